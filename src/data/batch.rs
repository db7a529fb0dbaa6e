//! Padded batch of utterances

use ndarray::{Array2, Array3, Axis};

/// Fixed-shape batch ready for the networks
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Network inputs `[batch, channels, time]`; one channel for scalar input,
    /// `quantize_channels` one-hot channels for quantized input
    pub inputs: Array3<f32>,
    /// Target samples `[batch, time, 1]`
    pub targets: Array3<f32>,
    /// Local conditioning `[batch, feature_dim, frames]`
    pub conditioning: Option<Array3<f32>>,
    /// Speaker ids, one per example
    pub speaker_ids: Option<Vec<usize>>,
    /// Valid samples per example; everything past it is zero padding
    pub lengths: Vec<usize>,
}

impl Batch {
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    /// Padded time dimension
    #[must_use]
    pub fn max_time(&self) -> usize {
        self.targets.shape()[1]
    }

    /// Targets as `[batch, time]`
    #[must_use]
    pub fn target_waveforms(&self) -> Array2<f32> {
        self.targets.index_axis(Axis(2), 0).to_owned()
    }
}
