//! Validate command implementation

use crate::config::{resolve_hparams, HParams, ValidateArgs};
use crate::error::Result;

/// One-paragraph summary of the resolved settings
pub fn format_summary(hp: &HParams) -> String {
    let mut lines = vec![
        format!("  Input: {:?} at {} Hz", hp.input_type, hp.sample_rate),
        format!("  Teacher: {} layers in {} stacks", hp.layers, hp.stacks),
        format!("  Student: {} flows {:?}", hp.iaf_layers.len(), hp.iaf_layers),
        format!("  Batch size: {}", hp.batch_size),
        format!("  Learning rate: {} ({:?})", hp.initial_learning_rate, hp.lr_schedule),
    ];
    if hp.local_conditioning() {
        lines.push(format!(
            "  Local conditioning: {} channels, hop {}",
            hp.cin_channels, hp.hop_size
        ));
    }
    if hp.global_conditioning() {
        lines.push(format!("  Speakers: {} (embedding {})", hp.n_speakers, hp.gin_channels));
    }
    if hp.clip_thresh > 0.0 {
        lines.push(format!("  Gradient clipping: {}", hp.clip_thresh));
    }
    lines.join("\n")
}

pub(crate) fn run_validate(args: &ValidateArgs) -> Result<()> {
    let hp = resolve_hparams(&args.hparams)?;
    println!("Hyperparameters are valid");
    println!("{}", format_summary(&hp));
    if args.detailed {
        println!("{}", hp.debug_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_mentions_conditioning_only_when_enabled() {
        let hp = HParams { cin_channels: 80, gin_channels: 0, ..HParams::default() };
        let summary = format_summary(&hp);
        assert!(summary.contains("80 channels"));
        assert!(!summary.contains("Speakers"));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = ValidateArgs {
            hparams: crate::config::HParamsArgs { preset: None, hparams: "batch_size=0".into() },
            detailed: false,
        };
        assert!(run_validate(&args).is_err());
    }
}
