//! CLI configuration: thin wrapper around `zwlink_config` that honors
//! the `--config` flag.

use std::path::PathBuf;

use zwlink_config::{Config, config_path, load_config_from};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` / `ZWLINK_CONFIG`, else the
/// platform default.
pub fn resolved_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load the configuration for this invocation.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = resolved_path(global);
    tracing::debug!(path = %path.display(), "loading configuration");
    Ok(load_config_from(&path)?)
}
