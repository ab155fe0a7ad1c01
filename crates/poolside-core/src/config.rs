//! Configuration loading and typed config structures for the bench.
//!
//! The canonical configuration lives in `poolside-config.yaml` at the
//! process working directory. This module defines strongly-typed structs
//! that mirror the YAML structure and provides a loader that reads the
//! file. A missing file means defaults; the `MIN_POOL` and `MAX_POOL`
//! environment variables override pool sizing after parsing, so the
//! bench can be re-dimensioned without editing YAML.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level bench configuration.
///
/// Mirrors the structure of `poolside-config.yaml`. All fields have
/// defaults matching the reference workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BenchConfig {
    /// World-level settings (name, RNG seed).
    #[serde(default)]
    pub world: WorldSettings,

    /// Pool sizing and reaping settings.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Simulated connection factory settings.
    #[serde(default)]
    pub factory: FactorySettings,

    /// Simulated query latency settings.
    #[serde(default)]
    pub query: QuerySettings,

    /// Workload chain pacing settings.
    #[serde(default)]
    pub load: LoadSettings,

    /// Metrics sampling and idle-nudge settings.
    #[serde(default)]
    pub sampling: SamplingSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl BenchConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `MIN_POOL` and `MAX_POOL` environment variables override the
    /// parsed `pool.min` and `pool.max` values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.pool.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.pool.apply_env_overrides();
        Ok(config)
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldSettings {
    /// Human-readable bench name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed for reproducible connect/query latency draws and
    /// band selection.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
        }
    }
}

/// Pool sizing and reaping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolSettings {
    /// Minimum live connections once the pool has warmed up. The reaper
    /// never drops the live count below this.
    #[serde(default = "default_min_pool")]
    pub min: usize,

    /// Maximum live connections. Demand beyond this queues FIFO.
    #[serde(default = "default_max_pool")]
    pub max: usize,

    /// How long a connection may sit idle before the reaper destroys it.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// How often the reaper scans for idle connections.
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl PoolSettings {
    /// Override pool sizing from `MIN_POOL` and `MAX_POOL` env vars
    /// when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("MIN_POOL").ok(),
            std::env::var("MAX_POOL").ok(),
        );
    }

    /// Apply raw override strings. Unparseable values are logged and
    /// ignored, keeping the configured value.
    fn apply_overrides(&mut self, min: Option<String>, max: Option<String>) {
        if let Some(raw) = min {
            match raw.parse::<usize>() {
                Ok(value) => self.min = value,
                Err(_) => warn!(value = raw, "ignoring unparseable MIN_POOL override"),
            }
        }
        if let Some(raw) = max {
            match raw.parse::<usize>() {
                Ok(value) => self.max = value,
                Err(_) => warn!(value = raw, "ignoring unparseable MAX_POOL override"),
            }
        }
    }

    /// Idle timeout as a [`Duration`].
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Reap interval as a [`Duration`].
    pub const fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: default_min_pool(),
            max: default_max_pool(),
            idle_timeout_ms: default_idle_timeout_ms(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

/// Simulated connection factory configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FactorySettings {
    /// Upper bound (exclusive) of the uniformly random connect latency.
    #[serde(default = "default_connect_latency_max_ms")]
    pub connect_latency_max_ms: u64,

    /// Connect attempts beyond the maximum pool size fail when their
    /// drawn latency exceeds this threshold.
    #[serde(default = "default_failure_latency_threshold_ms")]
    pub failure_latency_threshold_ms: u64,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            connect_latency_max_ms: default_connect_latency_max_ms(),
            failure_latency_threshold_ms: default_failure_latency_threshold_ms(),
        }
    }
}

/// Simulated query latency configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuerySettings {
    /// Lower bound (inclusive) of the uniformly random query latency.
    #[serde(default = "default_query_latency_min_ms")]
    pub latency_min_ms: u64,

    /// Upper bound (exclusive) of the uniformly random query latency.
    #[serde(default = "default_query_latency_max_ms")]
    pub latency_max_ms: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            latency_min_ms: default_query_latency_min_ms(),
            latency_max_ms: default_query_latency_max_ms(),
        }
    }
}

/// Workload chain pacing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadSettings {
    /// Pacing delay at the top of every chain iteration.
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
}

impl LoadSettings {
    /// Pacing delay as a [`Duration`].
    pub const fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            pace_ms: default_pace_ms(),
        }
    }
}

/// Metrics sampling and idle-nudge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SamplingSettings {
    /// How often the world samples a metrics snapshot.
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,

    /// How often the world checks for an idle pool and nudges the
    /// simulation with a fresh chain.
    #[serde(default = "default_nudge_interval_ms")]
    pub nudge_interval_ms: u64,
}

impl SamplingSettings {
    /// Metrics interval as a [`Duration`].
    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    /// Nudge interval as a [`Duration`].
    pub const fn nudge_interval(&self) -> Duration {
        Duration::from_millis(self.nudge_interval_ms)
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            metrics_interval_ms: default_metrics_interval_ms(),
            nudge_interval_ms: default_nudge_interval_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    "poolside".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_min_pool() -> usize {
    10
}

const fn default_max_pool() -> usize {
    100
}

const fn default_idle_timeout_ms() -> u64 {
    2_000
}

const fn default_reap_interval_ms() -> u64 {
    500
}

const fn default_connect_latency_max_ms() -> u64 {
    1_000
}

const fn default_failure_latency_threshold_ms() -> u64 {
    500
}

const fn default_query_latency_min_ms() -> u64 {
    1_000
}

const fn default_query_latency_max_ms() -> u64 {
    3_000
}

const fn default_pace_ms() -> u64 {
    500
}

const fn default_metrics_interval_ms() -> u64 {
    500
}

const fn default_nudge_interval_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_owned()
}
