//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use zwlink_config::ConfigError;
use zwlink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Driver error: {message}")]
    #[diagnostic(
        code(zwlink::driver),
        help("Check that the port exists and is not opened by another connection.\nTry: zwlink ports")
    )]
    Driver { message: String },

    #[error("Controller session '{name}' is not ready")]
    #[diagnostic(
        code(zwlink::not_ready),
        help("Wait for the driver-ready notification before writing to the network.")
    )]
    NotReady { name: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(zwlink::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("{resource_type} '{identifier}' already exists")]
    #[diagnostic(code(zwlink::conflict))]
    Conflict {
        resource_type: String,
        identifier: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(zwlink::validation))]
    Validation { field: String, reason: String },

    #[error("Invalid replay script {path}: {reason}")]
    #[diagnostic(
        code(zwlink::script),
        help("Scripts are YAML, or JSON when the file name ends in .json.")
    )]
    Script { path: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(zwlink::config_exists),
        help("Use --force to overwrite it.\nPath: {path}")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(zwlink::config))]
    Config(#[from] ConfigError),

    // ── Engine ───────────────────────────────────────────────────────

    #[error("{message}")]
    #[diagnostic(code(zwlink::engine))]
    Engine { message: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize output: {0}")]
    #[diagnostic(code(zwlink::output))]
    Output(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Driver { .. } | Self::NotReady { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Script { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DuplicateConnection { name } => CliError::Conflict {
                resource_type: "connection".into(),
                identifier: name,
            },

            CoreError::MissingParameter { name } => CliError::Validation {
                field: name,
                reason: "a value is required".into(),
            },

            CoreError::InvalidParameter { name, reason } => CliError::Validation {
                field: name,
                reason,
            },

            CoreError::SessionNotFound { name } | CoreError::SessionRemoved { name } => {
                CliError::NotFound {
                    resource_type: "connection".into(),
                    identifier: name,
                }
            }

            CoreError::NotReady { name } => CliError::NotReady { name },

            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
            },

            CoreError::IdentityConflict { entity, .. } => CliError::Conflict {
                resource_type: "device".into(),
                identifier: entity,
            },

            CoreError::PointNotFound { identifier } => CliError::NotFound {
                resource_type: "point".into(),
                identifier,
            },

            err @ (CoreError::UnsupportedValueKind { .. } | CoreError::InvalidValue { .. }) => {
                CliError::Validation {
                    field: "value".into(),
                    reason: err.to_string(),
                }
            }

            CoreError::Driver(e) => CliError::Driver {
                message: e.to_string(),
            },

            err @ (CoreError::Tree(_) | CoreError::Internal(_)) => CliError::Engine {
                message: err.to_string(),
            },
        }
    }
}

impl From<zwlink_core::TreeError> for CliError {
    fn from(err: zwlink_core::TreeError) -> Self {
        CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let cases = [
            (
                CoreError::DuplicateConnection { name: "Stick".into() },
                exit_code::CONFLICT,
            ),
            (
                CoreError::MissingParameter { name: "Name".into() },
                exit_code::USAGE,
            ),
            (
                CoreError::SessionRemoved { name: "Stick".into() },
                exit_code::NOT_FOUND,
            ),
            (
                CoreError::Driver(zwlink_api::Error::UnknownPort {
                    port: "/dev/ttyUSB9".into(),
                }),
                exit_code::CONNECTION,
            ),
            (CoreError::Internal("boom".into()), exit_code::GENERAL),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }
}
