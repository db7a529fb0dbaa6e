//! wavedistill CLI
//!
//! # Usage
//!
//! ```bash
//! # Distill from a trained teacher
//! wavedistill train --data-root data/ljspeech --checkpoint-teacher teacher.safetensors
//!
//! # Resume the student with overrides
//! wavedistill train --data-root data/ljspeech --checkpoint-teacher teacher.safetensors \
//!     --checkpoint-student checkpoints/checkpoint_step000010000.safetensors \
//!     --hparams "batch_size=4"
//!
//! # Check a preset
//! wavedistill validate --preset presets/ljspeech.yaml --detailed
//! ```

use clap::Parser;
use std::process::ExitCode;
use wavedistill::cli::{run_command, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
