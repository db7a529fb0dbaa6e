//! Command-line surface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// wavedistill: distill a parallel flow vocoder from an autoregressive teacher
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "wavedistill")]
#[command(version)]
#[command(about = "Train a parallel flow vocoder by probability density distillation")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Distill a student from a trained teacher
    Train(TrainArgs),

    /// Resolve and check hyperparameters without training
    Validate(ValidateArgs),
}

/// Hyperparameter sources shared by all commands
#[derive(clap::Args, Debug, Clone, PartialEq, Default)]
pub struct HParamsArgs {
    /// Preset file (JSON or YAML) applied over the defaults
    #[arg(long, value_name = "FILE")]
    pub preset: Option<PathBuf>,

    /// Comma-separated `name=value` overrides applied after the preset
    #[arg(long, default_value = "")]
    pub hparams: String,
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Directory containing train.txt and the preprocessed features
    #[arg(long, value_name = "DIR")]
    pub data_root: PathBuf,

    /// Directory where checkpoints and evaluation audio are written
    #[arg(long, value_name = "DIR", default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    #[command(flatten)]
    pub hparams: HParamsArgs,

    /// Resume the student (weights, optimizer, counters) from this checkpoint
    #[arg(long, value_name = "FILE")]
    pub checkpoint_student: Option<PathBuf>,

    /// Trained teacher checkpoint
    #[arg(long, value_name = "FILE")]
    pub checkpoint_teacher: PathBuf,

    /// Copy shape-compatible student weights from this checkpoint
    #[arg(long, value_name = "FILE")]
    pub restore_parts: Option<PathBuf>,

    /// Append metrics as JSON lines to this file
    #[arg(long, value_name = "FILE")]
    pub log_event_path: Option<PathBuf>,

    /// Ignore optimizer state stored in the student checkpoint
    #[arg(long)]
    pub reset_optimizer: bool,

    /// Train on a single speaker of a multi-speaker corpus
    #[arg(long, value_name = "N")]
    pub speaker_id: Option<usize>,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub hparams: HParamsArgs,

    /// Print the resolved hyperparameters
    #[arg(short, long)]
    pub detailed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train() {
        let cli = Cli::try_parse_from([
            "wavedistill",
            "train",
            "--data-root",
            "data/ljspeech",
            "--checkpoint-teacher",
            "teacher.safetensors",
            "--hparams",
            "batch_size=4,amsgrad=true",
            "--speaker-id",
            "3",
            "--reset-optimizer",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Command::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(args.data_root, PathBuf::from("data/ljspeech"));
        assert_eq!(args.checkpoint_dir, PathBuf::from("checkpoints"));
        assert_eq!(args.hparams.hparams, "batch_size=4,amsgrad=true");
        assert_eq!(args.speaker_id, Some(3));
        assert!(args.reset_optimizer);
    }

    #[test]
    fn test_teacher_checkpoint_is_required() {
        let result = Cli::try_parse_from(["wavedistill", "train", "--data-root", "d"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::try_parse_from(["wavedistill", "-q", "validate", "--preset", "p.json", "-d"])
            .unwrap();
        assert!(cli.quiet);
        let Command::Validate(args) = cli.command else { panic!("expected validate") };
        assert_eq!(args.hparams.preset, Some(PathBuf::from("p.json")));
        assert!(args.detailed);
    }
}
