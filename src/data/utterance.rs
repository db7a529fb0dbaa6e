//! A single utterance as loaded from disk

use ndarray::Array2;

/// Raw training example
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Waveform samples
    pub waveform: Vec<f32>,
    /// Frame-aligned features, `[frames, feature_dim]`
    pub conditioning: Option<Array2<f32>>,
    /// Speaker identifier for multi-speaker corpora
    pub speaker_id: Option<usize>,
}

impl Utterance {
    /// Unconditioned utterance
    #[must_use]
    pub fn from_waveform(waveform: Vec<f32>) -> Self {
        Self { waveform, conditioning: None, speaker_id: None }
    }

    /// Attach local conditioning features
    #[must_use]
    pub fn with_conditioning(mut self, conditioning: Array2<f32>) -> Self {
        self.conditioning = Some(conditioning);
        self
    }

    /// Attach a speaker id
    #[must_use]
    pub fn with_speaker(mut self, speaker_id: usize) -> Self {
        self.speaker_id = Some(speaker_id);
        self
    }

    /// Waveform length in samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.waveform.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waveform.is_empty()
    }

    /// Number of conditioning frames, zero when unconditioned
    #[must_use]
    pub fn frames(&self) -> usize {
        self.conditioning.as_ref().map_or(0, Array2::nrows)
    }
}
