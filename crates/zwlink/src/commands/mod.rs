//! Command dispatch: bridges CLI args -> engine -> output formatting.

pub mod config_cmd;
pub mod ports;
pub mod replay;

use zwlink_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command that needs the loaded configuration.
pub async fn dispatch(cmd: Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Ports(args) => ports::handle(&args, config, global),
        Command::Replay(args) => replay::handle(args, config, global).await,
        Command::Config(args) => config_cmd::handle(args, config, global),
        // Completions are handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}
