//! Hyperparameter validation
//!
//! Checks run once before any data is read or model is built.

use super::HParams;
use crate::error::{Error, Result};

/// Validate a hyperparameter set
///
/// Checks:
/// - Output distribution is Gaussian (two channels), and a quantized input
///   agrees with it on the channel count
/// - Network shapes are positive and layers divide into stacks
/// - Batching, split and schedule settings are usable
pub fn validate_hparams(hp: &HParams) -> Result<()> {
    let fail = |msg: String| Err(Error::ConfigError(msg));

    if hp.input_type.is_quantized() && hp.out_channels != hp.quantize_channels {
        return fail(format!(
            "mulaw-quantize input needs out_channels == quantize_channels, got {} and {}",
            hp.out_channels, hp.quantize_channels
        ));
    }
    if hp.out_channels != 2 {
        return fail(format!(
            "only Gaussian outputs are supported (out_channels = 2), got {}",
            hp.out_channels
        ));
    }
    if hp.input_type.is_quantized() && hp.quantize_channels < 2 {
        return fail("quantize_channels must be at least 2".into());
    }

    if hp.layers == 0 || hp.stacks == 0 || hp.layers % hp.stacks != 0 {
        return fail(format!(
            "layers ({}) must be a positive multiple of stacks ({})",
            hp.layers, hp.stacks
        ));
    }
    if hp.iaf_layers.is_empty() || hp.iaf_layers.contains(&0) {
        return fail(format!(
            "iaf_layers must list at least one positive layer count, got {:?}",
            hp.iaf_layers
        ));
    }
    if hp.iaf_stacks == 0 || hp.iaf_layers.iter().any(|l| l % hp.iaf_stacks != 0) {
        return fail(format!(
            "every iaf_layers entry must be a multiple of iaf_stacks ({})",
            hp.iaf_stacks
        ));
    }
    if hp.residual_channels == 0 || hp.iaf_residual_channels == 0 || hp.kernel_size == 0 {
        return fail("residual channels and kernel_size must be positive".into());
    }
    if hp.global_conditioning() && hp.n_speakers == 0 {
        return fail("gin_channels > 0 needs n_speakers > 0".into());
    }
    if hp.hop_size == 0 {
        return fail("hop_size must be positive".into());
    }

    if hp.batch_size == 0 {
        return fail("batch_size must be positive".into());
    }
    if let Some(fraction) = hp.test_size {
        if !(0.0..1.0).contains(&fraction) {
            return fail(format!("test_size must be in [0, 1), got {fraction}"));
        }
    }
    match hp.max_time_steps() {
        Some(0) => return fail("maximum crop length must be positive".into()),
        Some(steps) if hp.hop_aligned() && steps < hp.hop_size => {
            return fail(format!(
                "crop length {steps} is shorter than one conditioning frame (hop_size {})",
                hp.hop_size
            ));
        }
        _ => {}
    }

    if !(hp.initial_learning_rate > 0.0) {
        return fail(format!(
            "initial_learning_rate must be positive, got {}",
            hp.initial_learning_rate
        ));
    }
    hp.lr_schedule.validate().map_err(Error::ConfigError)?;
    if !(0.0..=1.0).contains(&hp.ema_decay) {
        return fail(format!("ema_decay must be in [0, 1], got {}", hp.ema_decay));
    }
    if hp.checkpoint_interval == 0
        || hp.train_eval_interval == 0
        || hp.test_eval_epoch_interval == 0
    {
        return fail("checkpoint and evaluation intervals must be positive".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputType;

    #[test]
    fn test_defaults_validate() {
        assert!(validate_hparams(&HParams::default()).is_ok());
    }

    #[test]
    fn test_quantized_input_channel_mismatch() {
        let hp = HParams {
            input_type: InputType::MulawQuantize,
            quantize_channels: 256,
            ..HParams::default()
        };
        let err = validate_hparams(&hp).unwrap_err();
        assert!(err.to_string().contains("quantize_channels"));
    }

    #[test]
    fn test_non_gaussian_output_rejected() {
        let hp = HParams { out_channels: 30, ..HParams::default() };
        assert!(validate_hparams(&hp).is_err());
    }

    #[test]
    fn test_layer_stack_divisibility() {
        let hp = HParams { layers: 10, stacks: 3, ..HParams::default() };
        assert!(validate_hparams(&hp).is_err());
        let hp = HParams { iaf_layers: vec![4, 0], ..HParams::default() };
        assert!(validate_hparams(&hp).is_err());
    }

    #[test]
    fn test_speaker_conditioning_needs_speakers() {
        let hp = HParams { gin_channels: 16, n_speakers: 0, ..HParams::default() };
        assert!(validate_hparams(&hp).is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let hp = HParams { checkpoint_interval: 0, ..HParams::default() };
        assert!(validate_hparams(&hp).is_err());
    }

    #[test]
    fn test_crop_shorter_than_hop_rejected() {
        let hp = HParams { max_time_steps: Some(100), hop_size: 256, ..HParams::default() };
        let err = validate_hparams(&hp).unwrap_err();
        assert!(err.to_string().contains("hop_size"));

        let unconditioned = HParams { cin_channels: 0, ..hp };
        assert!(validate_hparams(&unconditioned).is_ok());
    }
}
