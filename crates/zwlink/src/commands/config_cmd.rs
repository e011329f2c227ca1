//! Config subcommand handlers.

use zwlink_config::{Config, save_config_to};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::resolved_path;
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let path = resolved_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config_to(&Config::default(), &path)?;
            output::print_output(
                &format!("Wrote default configuration to {}", path.display()),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let out = output::render_single(&global.output, config, |cfg| {
                toml::to_string_pretty(cfg).unwrap_or_else(|e| format!("# unrenderable: {e}"))
            })?;
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&resolved_path(global).display().to_string(), global.quiet);
            Ok(())
        }
    }
}
