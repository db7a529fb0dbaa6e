//! CLI command implementations

mod train;
mod validate;

use crate::cli::{init_logging, LogLevel};
use crate::config::{Cli, Command};

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<(), String> {
    let level = LogLevel::from_flags(cli.quiet, cli.verbose);
    init_logging(level);

    let result = match cli.command {
        Command::Train(args) => train::run_train(&args),
        Command::Validate(args) => validate::run_validate(&args),
    };
    result.map_err(|e| {
        let kind = if e.is_user_error() { "Configuration" } else { "Training" };
        format!("{kind} failed: {e}")
    })
}
