//! Hyperparameters, presets and the command-line surface

mod cli;
mod hparams;
mod preset;
mod validate;

pub use cli::{Cli, Command, HParamsArgs, TrainArgs, ValidateArgs};
pub use hparams::{HParams, InputType};
pub use preset::{apply_overrides, load_preset};
pub use validate::validate_hparams;

use crate::error::Result;

/// Defaults, then the preset, then the overrides; validated
pub fn resolve_hparams(args: &HParamsArgs) -> Result<HParams> {
    let base = match &args.preset {
        Some(path) => load_preset(path)?,
        None => HParams::default(),
    };
    let hparams = apply_overrides(&base, &args.hparams)?;
    validate_hparams(&hparams)?;
    Ok(hparams)
}
