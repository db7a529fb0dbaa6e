//! Mono WAV output

use crate::error::{Error, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Write samples in [-1, 1] as 16-bit PCM; values outside are clipped
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &x in samples {
        let value = if x.is_finite() { x.clamp(-1.0, 1.0) } else { 0.0 };
        writer.write_sample((value * f32::from(i16::MAX)).round() as i16)?;
    }
    writer.finalize()?;
    tracing::debug!(path = %path.display(), samples = samples.len(), "wrote audio");
    Ok(())
}
