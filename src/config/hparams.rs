//! Hyperparameters shared by data preparation, models and training

use crate::data::TestSize;
use crate::optim::LrSchedule;
use serde::{Deserialize, Serialize};

/// Waveform representation fed to the networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    /// Scalar samples in [-1, 1]
    #[default]
    Raw,
    /// Mu-law companded scalar samples in [-1, 1]
    Mulaw,
    /// Mu-law class indices, fed as one-hot vectors
    MulawQuantize,
}

impl InputType {
    pub fn is_quantized(self) -> bool {
        self == Self::MulawQuantize
    }

    pub fn is_scalar(self) -> bool {
        !self.is_quantized()
    }
}

/// All tunable settings.
///
/// Every field has a default; presets and overrides only name what changes.
/// Channel counts of zero disable the corresponding conditioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HParams {
    // audio
    pub input_type: InputType,
    pub quantize_channels: usize,
    pub sample_rate: u32,
    /// Silence threshold in quantization steps around the silence level
    pub silence_threshold: f32,
    /// Waveform samples per conditioning frame
    pub hop_size: usize,

    // networks
    pub out_channels: usize,
    pub layers: usize,
    pub stacks: usize,
    pub residual_channels: usize,
    pub kernel_size: usize,
    pub cin_channels: usize,
    pub gin_channels: usize,
    pub n_speakers: usize,
    pub upsample_conditional_features: bool,
    /// Layers of each student flow; one entry per flow
    pub iaf_layers: Vec<usize>,
    pub iaf_stacks: usize,
    pub iaf_residual_channels: usize,
    pub log_scale_min: f32,

    // data
    pub batch_size: usize,
    pub max_time_sec: Option<f32>,
    pub max_time_steps: Option<usize>,
    pub test_size: Option<f64>,
    pub test_num_samples: Option<usize>,
    pub random_state: u64,
    pub num_workers: usize,

    // optimization
    pub initial_learning_rate: f32,
    pub lr_schedule: LrSchedule,
    pub adam_beta1: f32,
    pub adam_beta2: f32,
    pub adam_eps: f32,
    pub amsgrad: bool,
    pub weight_decay: f32,
    /// Global gradient norm ceiling; non-positive disables clipping
    pub clip_thresh: f32,
    pub exponential_moving_average: bool,
    pub ema_decay: f32,
    pub share_upsample_conv: bool,

    // schedule
    pub nepochs: usize,
    pub checkpoint_interval: u64,
    pub train_eval_interval: u64,
    pub test_eval_epoch_interval: usize,
    pub save_optimizer_state: bool,
    /// Seed for noise and cropping; fresh entropy when absent
    pub seed: Option<u64>,
}

impl Default for HParams {
    fn default() -> Self {
        Self {
            input_type: InputType::Raw,
            quantize_channels: 65536,
            sample_rate: 22050,
            silence_threshold: 2.0,
            hop_size: 256,

            out_channels: 2,
            layers: 24,
            stacks: 4,
            residual_channels: 64,
            kernel_size: 3,
            cin_channels: 80,
            gin_channels: 0,
            n_speakers: 7,
            upsample_conditional_features: true,
            iaf_layers: vec![10, 10, 10, 30],
            iaf_stacks: 1,
            iaf_residual_channels: 64,
            log_scale_min: -7.0,

            batch_size: 2,
            max_time_sec: None,
            max_time_steps: Some(8000),
            test_size: Some(0.0441),
            test_num_samples: None,
            random_state: 1234,
            num_workers: 2,

            initial_learning_rate: 1e-3,
            lr_schedule: LrSchedule::default(),
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_eps: 1e-8,
            amsgrad: false,
            weight_decay: 0.0,
            clip_thresh: -1.0,
            exponential_moving_average: true,
            ema_decay: 0.9999,
            share_upsample_conv: true,

            nepochs: 2000,
            checkpoint_interval: 10_000,
            train_eval_interval: 10_000,
            test_eval_epoch_interval: 5,
            save_optimizer_state: true,
            seed: None,
        }
    }
}

impl HParams {
    /// Frame-aligned features are fed to the networks
    pub fn local_conditioning(&self) -> bool {
        self.cin_channels > 0
    }

    /// Speaker ids are fed to the networks
    pub fn global_conditioning(&self) -> bool {
        self.gin_channels > 0
    }

    /// Conditioning frames are upsampled by repetition at `hop_size`
    pub fn hop_aligned(&self) -> bool {
        self.local_conditioning() && self.upsample_conditional_features
    }

    /// Input channels of the waveform tensor
    pub fn input_channels(&self) -> usize {
        if self.input_type.is_quantized() {
            self.quantize_channels
        } else {
            1
        }
    }

    /// Crop window in samples, if any
    pub fn max_time_steps(&self) -> Option<usize> {
        match (self.max_time_sec, self.max_time_steps) {
            (Some(sec), _) => Some((sec * self.sample_rate as f32) as usize),
            (None, steps) => steps,
        }
    }

    /// Size of the held-out split
    pub fn test_split(&self) -> TestSize {
        match (self.test_size, self.test_num_samples) {
            (Some(fraction), _) => TestSize::Fraction(fraction),
            (None, Some(count)) => TestSize::Count(count),
            (None, None) => TestSize::Count(0),
        }
    }

    /// Human-readable dump of every setting
    pub fn debug_string(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("<unprintable hparams: {e}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_gaussian_scalar() {
        let hp = HParams::default();
        assert_eq!(hp.out_channels, 2);
        assert_eq!(hp.input_channels(), 1);
        assert!(hp.local_conditioning());
        assert!(!hp.global_conditioning());
        assert!(hp.hop_aligned());
    }

    #[test]
    fn test_max_time_sec_takes_precedence() {
        let hp = HParams { max_time_sec: Some(0.5), sample_rate: 16000, ..HParams::default() };
        assert_eq!(hp.max_time_steps(), Some(8000));

        let hp = HParams { max_time_sec: None, max_time_steps: None, ..HParams::default() };
        assert_eq!(hp.max_time_steps(), None);
    }

    #[test]
    fn test_test_split_falls_back_to_count() {
        let hp = HParams { test_size: None, test_num_samples: Some(5), ..HParams::default() };
        assert_eq!(hp.test_split(), TestSize::Count(5));
    }

    #[test]
    fn test_input_type_names() {
        let parsed: InputType = serde_json::from_str("\"mulaw-quantize\"").unwrap();
        assert_eq!(parsed, InputType::MulawQuantize);
        assert!(parsed.is_quantized());
        let hp = HParams { input_type: parsed, quantize_channels: 256, ..HParams::default() };
        assert_eq!(hp.input_channels(), 256);
    }

    #[test]
    fn test_debug_string_lists_fields() {
        let dump = HParams::default().debug_string();
        assert!(dump.contains("iaf_layers"));
        assert!(dump.contains("log_scale_min"));
    }
}
