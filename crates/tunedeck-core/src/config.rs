//! Configuration for the download orchestrator and stall watchdog.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum number of concurrent downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Minimum allowed concurrent downloads.
pub const MIN_CONCURRENT_DOWNLOADS: usize = 1;

/// Maximum allowed concurrent downloads.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 8;

const fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

const fn default_watchdog_interval_secs() -> u64 {
    5
}

const fn default_stall_detect_secs() -> u64 {
    30
}

const fn default_stall_timeout_secs() -> u64 {
    120
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

const fn default_completed_retention_secs() -> u64 {
    5 * 60
}

const fn default_failed_retention_secs() -> u64 {
    60 * 60
}

/// Configuration for the download orchestrator.
///
/// All durations are expressed in whole seconds so the struct round-trips
/// cleanly through JSON config files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs executing simultaneously.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
    /// How often each job's watchdog checks for stalled progress.
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    /// Seconds without a progress event before a stall is flagged.
    #[serde(default = "default_stall_detect_secs")]
    pub stall_detect_secs: u64,
    /// Total seconds without progress before a stalled job is force-failed.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// How often the cleanup sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long completed jobs are retained before the sweep purges them.
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,
    /// How long failed jobs are retained before the sweep purges them.
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            watchdog_interval_secs: default_watchdog_interval_secs(),
            stall_detect_secs: default_stall_detect_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            completed_retention_secs: default_completed_retention_secs(),
            failed_retention_secs: default_failed_retention_secs(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate and clamp configuration values into sane ranges.
    ///
    /// The concurrency ceiling is clamped into
    /// [`MIN_CONCURRENT_DOWNLOADS`, `MAX_CONCURRENT_DOWNLOADS`], the watchdog
    /// interval is kept at one second minimum, and the stall timeout is kept
    /// strictly greater than the detect threshold.
    pub fn validate(&mut self) {
        self.max_concurrent_downloads = self
            .max_concurrent_downloads
            .clamp(MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS);
        self.watchdog_interval_secs = self.watchdog_interval_secs.max(1);
        self.stall_detect_secs = self.stall_detect_secs.max(1);
        if self.stall_timeout_secs <= self.stall_detect_secs {
            self.stall_timeout_secs = self.stall_detect_secs + 1;
        }
        self.sweep_interval_secs = self.sweep_interval_secs.max(1);
    }

    /// Watchdog tick interval as a [`Duration`].
    #[must_use]
    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    /// Stall detect threshold as a [`Duration`].
    #[must_use]
    pub const fn stall_detect(&self) -> Duration {
        Duration::from_secs(self.stall_detect_secs)
    }

    /// Stall timeout threshold as a [`Duration`].
    #[must_use]
    pub const fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Cleanup sweep interval as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Retention window for completed jobs.
    #[must_use]
    pub const fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    /// Retention window for failed jobs.
    #[must_use]
    pub const fn failed_retention(&self) -> Duration {
        Duration::from_secs(self.failed_retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.stall_detect_secs, 30);
        assert_eq!(config.stall_timeout_secs, 120);
        assert_eq!(config.sweep_interval_secs, 60);
    }

    #[test]
    fn test_validate_clamps_concurrency() {
        let mut config = OrchestratorConfig {
            max_concurrent_downloads: 0,
            ..Default::default()
        };
        config.validate();
        assert_eq!(config.max_concurrent_downloads, MIN_CONCURRENT_DOWNLOADS);

        config.max_concurrent_downloads = 100;
        config.validate();
        assert_eq!(config.max_concurrent_downloads, MAX_CONCURRENT_DOWNLOADS);
    }

    #[test]
    fn test_validate_keeps_timeout_above_detect() {
        let mut config = OrchestratorConfig {
            stall_detect_secs: 30,
            stall_timeout_secs: 10,
            ..Default::default()
        };
        config.validate();
        assert!(config.stall_timeout_secs > config.stall_detect_secs);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }
}
