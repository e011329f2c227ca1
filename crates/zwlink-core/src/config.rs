// ── Runtime engine configuration ──
//
// Timing knobs for the session actors. The CLI builds an `EngineConfig`
// from its config file and hands it to the supervisor; core never reads
// config files.

use std::time::Duration;

/// Wait after re-adding a driver connection before the driver accepts
/// further calls on it.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Interval between controller reachability checks while disconnected.
pub const DEFAULT_REACHABILITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration shared by every controller session of a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay between re-adding a connection and requesting the
    /// controller's node state during a restart.
    pub settle_delay: Duration,
    /// Poll period of the disconnect-recovery loop. Never zero.
    pub reachability_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            reachability_poll_interval: DEFAULT_REACHABILITY_POLL_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Poll interval clamped away from zero so the recovery loop can
    /// never spin.
    pub(crate) fn poll_interval(&self) -> Duration {
        self.reachability_poll_interval
            .max(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = EngineConfig {
            reachability_poll_interval: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(
            EngineConfig::default().poll_interval(),
            DEFAULT_REACHABILITY_POLL_INTERVAL
        );
    }
}
