//! Audio front end: silence trimming, time-resolution adjustment, hop size

use crate::config::{HParams, InputType};
use ndarray::{s, Array2, Axis};
use std::ops::Range;

/// Signal-level operations the batch assembler relies on
pub trait AudioFrontEnd: Send + Sync {
    /// Range of samples between the first and last non-silent sample,
    /// or `None` when the whole waveform is silent
    fn trim(&self, waveform: &[f32]) -> Option<Range<usize>>;

    /// Waveform samples per conditioning frame
    fn hop_size(&self) -> usize;

    /// Bring conditioning to sample resolution and trim silence from both.
    ///
    /// Frames are repeated `len(x) / frames` times, then zero-padded to
    /// `len(x)`; waveform and conditioning are cut to the same trimmed range.
    fn adjust_time_resolution(
        &self,
        waveform: &[f32],
        conditioning: &Array2<f32>,
    ) -> Option<(Vec<f32>, Array2<f32>)> {
        let frames = conditioning.nrows().max(1);
        let factor = waveform.len() / frames;
        let dim = conditioning.ncols();

        let mut upsampled = Array2::zeros((waveform.len(), dim));
        for (f, row) in conditioning.axis_iter(Axis(0)).enumerate() {
            let start = f * factor;
            if start >= waveform.len() {
                break;
            }
            let end = (start + factor).min(waveform.len());
            upsampled.slice_mut(s![start..end, ..]).assign(&row.broadcast((end - start, dim))?);
        }

        let range = self.trim(waveform)?;
        Some((
            waveform[range.clone()].to_vec(),
            upsampled.slice(s![range, ..]).to_owned(),
        ))
    }
}

/// Amplitude-threshold front end
///
/// A sample is silent when `|x - center| <= threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdFrontEnd {
    hop_size: usize,
    center: f32,
    threshold: f32,
}

impl ThresholdFrontEnd {
    pub fn new(hop_size: usize, center: f32, threshold: f32) -> Self {
        Self { hop_size, center, threshold }
    }

    /// Front end for the configured input representation.
    ///
    /// `silence_threshold` counts quantization steps. Quantized inputs hold
    /// class indices and are silent near the middle class; scalar inputs in
    /// [-1, 1] convert the threshold to amplitude at `2 / quantize_channels`
    /// per step.
    pub fn from_hparams(hp: &HParams) -> Self {
        match hp.input_type {
            InputType::MulawQuantize => Self::new(
                hp.hop_size,
                (hp.quantize_channels / 2) as f32 - 1.0,
                hp.silence_threshold,
            ),
            InputType::Raw | InputType::Mulaw => Self::new(
                hp.hop_size,
                0.0,
                hp.silence_threshold * 2.0 / hp.quantize_channels.max(1) as f32,
            ),
        }
    }
}

impl AudioFrontEnd for ThresholdFrontEnd {
    fn trim(&self, waveform: &[f32]) -> Option<Range<usize>> {
        let loud = |x: &f32| (x - self.center).abs() > self.threshold;
        let start = waveform.iter().position(loud)?;
        let end = waveform.iter().rposition(loud)? + 1;
        Some(start..end)
    }

    fn hop_size(&self) -> usize {
        self.hop_size
    }
}

/// Round `length` down to a multiple of `divisible_by`
pub fn ensure_divisible(length: usize, divisible_by: usize) -> usize {
    if divisible_by == 0 {
        return length;
    }
    length - length % divisible_by
}

/// Expand a mu-law companded sample in [-1, 1] back to linear amplitude
pub fn inv_mulaw(y: f32, mu: f32) -> f32 {
    y.signum() * ((1.0 + mu).powf(y.abs()) - 1.0) / mu
}

/// Linear amplitude of a mu-law class index in `0..=mu`
pub fn inv_mulaw_quantize(class: f32, mu: f32) -> f32 {
    inv_mulaw(2.0 * class / mu - 1.0, mu)
}
