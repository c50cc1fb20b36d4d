//! Monitor pipeline configuration.
//!
//! [`MonitorConfig`] collects the tunables for the whole pipeline: database
//! path, metric bucket granularity and horizon, channel capacities, the
//! dispatcher tick, notification retry policy, derived-metric definitions,
//! and health thresholds. Every field has a serde default so a partial TOML
//! file (or `MonitorConfig::default()`) is always well-formed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::VigilError;

fn default_bucket_secs() -> u64 {
    60
}

fn default_horizon_buckets() -> usize {
    60
}

fn default_channel_capacity() -> usize {
    4096
}

fn default_tick_secs() -> u64 {
    5
}

fn default_notify_attempts() -> u32 {
    3
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_notify_backoff_ms() -> u64 {
    100
}

/// A derived metric: counts entries whose action matches a glob selector.
///
/// The aggregator always maintains `<action>.count` per action; metric
/// definitions add named roll-ups across actions, e.g. selector `*.failed`
/// feeding `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    /// Metric name the matching entries feed.
    pub name: String,
    /// Glob matched against the entry's action tag.
    pub selector: String,
    /// Optional target-type constraint.
    #[serde(default)]
    pub target_type: Option<String>,
}

/// A health check over a critical metric's current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Metric selector, same grammar as rule selectors.
    pub metric: String,
    /// Breaching this value degrades health.
    pub soft: f64,
    /// Breaching this value makes health unhealthy.
    pub hard: f64,
}

/// Configuration for the monitor pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Path to the SQLite database holding the audit log, idempotency
    /// records, metric rollups, and alert history.
    pub db_path: PathBuf,
    /// Metric bucket granularity in seconds.
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,
    /// How many closed buckets per metric are kept in memory.
    #[serde(default = "default_horizon_buckets")]
    pub horizon_buckets: usize,
    /// Capacity of the bounded channels between pipeline stages.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Dispatcher tick interval in seconds, driving periodic rules and
    /// cooldown expiry during quiet periods.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Notification dispatch attempts before giving up.
    #[serde(default = "default_notify_attempts")]
    pub notify_attempts: u32,
    /// Base backoff between notification attempts, doubled per retry.
    #[serde(default = "default_notify_backoff_ms")]
    pub notify_backoff_ms: u64,
    /// Days to keep audit entries and rollups. `None` disables the
    /// background sweeper; explicit sweeps still work.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// How often the background sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Derived metric definitions.
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
    /// Critical-metric health checks.
    #[serde(default)]
    pub health: Vec<HealthCheck>,
}

impl MonitorConfig {
    /// A default configuration rooted at the given database path.
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        MonitorConfig {
            db_path: db_path.into(),
            bucket_secs: default_bucket_secs(),
            horizon_buckets: default_horizon_buckets(),
            channel_capacity: default_channel_capacity(),
            tick_secs: default_tick_secs(),
            notify_attempts: default_notify_attempts(),
            notify_backoff_ms: default_notify_backoff_ms(),
            retention_days: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            metrics: Vec::new(),
            health: Vec::new(),
        }
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, VigilError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VigilError::Config(format!("failed to read config file: {e}")))?;
        let config: MonitorConfig = toml::from_str(&text)
            .map_err(|e| VigilError::Config(format!("failed to parse config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would stall or wedge the pipeline.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.bucket_secs == 0 {
            return Err(VigilError::Config("bucket_secs must be positive".into()));
        }
        if self.horizon_buckets == 0 {
            return Err(VigilError::Config("horizon_buckets must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(VigilError::Config("channel_capacity must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(VigilError::Config(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        if self.retention_days == Some(0) {
            return Err(VigilError::Config(
                "retention_days must be positive when set".into(),
            ));
        }
        for def in &self.metrics {
            if def.name.trim().is_empty() || def.selector.trim().is_empty() {
                return Err(VigilError::Config(
                    "metric definitions need a name and a selector".into(),
                ));
            }
            glob::Pattern::new(&def.selector).map_err(|e| {
                VigilError::Config(format!("bad selector {:?}: {e}", def.selector))
            })?;
        }
        for check in &self.health {
            if check.hard < check.soft {
                return Err(VigilError::Config(format!(
                    "health check {:?} has hard threshold below soft",
                    check.metric
                )));
            }
        }
        Ok(())
    }
}
