//! Configuration for the zwlink binary.
//!
//! TOML file + `ZWLINK_` environment overrides, layered with `figment`,
//! and translation into `zwlink_core::EngineConfig`. Core never reads
//! configuration files; only the binary depends on this crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zwlink_core::EngineConfig;
use zwlink_core::config::{DEFAULT_REACHABILITY_POLL_INTERVAL, DEFAULT_SETTLE_DELAY};

/// Prefix of environment overrides. Nested keys use `__`, e.g.
/// `ZWLINK_ENGINE__SETTLE_DELAY_MS=500`.
pub const ENV_PREFIX: &str = "ZWLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub ports: PortsSection,

    #[serde(default)]
    pub tree: TreeSection,
}

/// Session timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineSection {
    /// Wait after re-adding a driver connection, in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Reachability poll period while disconnected, in milliseconds.
    #[serde(default = "default_reachability_poll_ms")]
    pub reachability_poll_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            reachability_poll_ms: default_reachability_poll_ms(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    millis(DEFAULT_SETTLE_DELAY)
}
fn default_reachability_poll_ms() -> u64 {
    millis(DEFAULT_REACHABILITY_POLL_INTERVAL)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Serial port discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortsSection {
    /// Device-name regexes replacing the built-in OS defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

/// Persistence of the in-memory entity tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TreeSection {
    /// JSON snapshot loaded before restore and written on exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
}

impl Config {
    /// Translate into runtime settings for the supervisor.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        if self.engine.reachability_poll_ms == 0 {
            return Err(ConfigError::Validation {
                field: "engine.reachability_poll_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(EngineConfig {
            settle_delay: Duration::from_millis(self.engine.settle_delay_ms),
            reachability_poll_interval: Duration::from_millis(self.engine.reachability_poll_ms),
        })
    }

    /// Port patterns in effect: the configured ones, or the OS defaults.
    pub fn port_patterns(&self) -> Vec<String> {
        if self.ports.patterns.is_empty() {
            zwlink_api::ports::default_patterns()
                .into_iter()
                .map(String::from)
                .collect()
        } else {
            self.ports.patterns.clone()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "zwlink", "zwlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("zwlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg.engine, EngineSection::default());
        assert_eq!(cfg.engine_config().unwrap(), EngineConfig::default());
        assert!(cfg.tree.snapshot.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[engine]\nsettle_delay_ms = 250\n\n[ports]\npatterns = [\"^ttyZ[0-9]$\"]\n\n[tree]\nsnapshot = \"/var/lib/zwlink/tree.json\"\n",
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        let engine = cfg.engine_config().unwrap();

        assert_eq!(engine.settle_delay, Duration::from_millis(250));
        assert_eq!(engine.reachability_poll_interval, DEFAULT_REACHABILITY_POLL_INTERVAL);
        assert_eq!(cfg.port_patterns(), vec!["^ttyZ[0-9]$".to_owned()]);
        assert_eq!(
            cfg.tree.snapshot.as_deref(),
            Some(Path::new("/var/lib/zwlink/tree.json"))
        );
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let cfg = Config {
            engine: EngineSection {
                reachability_poll_ms: 0,
                ..EngineSection::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            cfg.engine_config(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            engine: EngineSection {
                settle_delay_ms: 10,
                reachability_poll_ms: 20,
            },
            ports: PortsSection {
                patterns: vec!["^ttyUSB[0-9]+$".into()],
            },
            tree: TreeSection {
                snapshot: Some(dir.path().join("tree.json")),
            },
        };

        save_config_to(&cfg, &path).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn empty_patterns_fall_back_to_os_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.port_patterns().len(), zwlink_api::ports::default_patterns().len());
    }
}
