//! Configuration for the monitoring pipeline
//!
//! The viewer reads a TOML file (default `~/.config/fleet-monitor/viewer.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::monitoring::Thresholds;

/// Top-level viewer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket endpoint of the monitoring feed
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Transport limits for the connection manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Reconnect attempts before giving up (default: 5)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Fixed delay between reconnect attempts in milliseconds (default: 3000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Outbound heartbeat interval in milliseconds, 0 disables it (default: 30000)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

/// Capacities and thresholds for the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Points kept per server and metric (default: 100)
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Alerts kept in the alert log (default: 100)
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,

    /// Interval of the viewer's health summary in seconds (default: 10)
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,

    /// Per-metric overrides, merged onto the default threshold set
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

fn default_endpoint() -> String {
    "ws://localhost:8080/api/ws/monitoring".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_history_capacity() -> usize {
    100
}

fn default_alert_capacity() -> usize {
    100
}

fn default_summary_interval() -> u64 {
    10
}

impl ConnectionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Heartbeat period, `None` when heartbeats are disabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl MonitoringConfig {
    /// The active threshold set: defaults with the configured overrides applied
    pub fn thresholds(&self) -> Thresholds {
        let mut thresholds = Thresholds::default();
        if let Some(overrides) = &self.thresholds {
            thresholds.merge(overrides.clone());
        }
        thresholds
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            alert_capacity: default_alert_capacity(),
            summary_interval_secs: default_summary_interval(),
            thresholds: None,
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if no file exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let default_path = dirs::config_dir()?.join("fleet-monitor/viewer.toml");
            default_path.exists().then_some(default_path)
        });

        let config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.validate()?;
        trace!("loaded config: {config:?}");
        Ok(config)
    }

    /// Reject configurations the aggregator cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.monitoring.history_capacity == 0 {
            anyhow::bail!("monitoring.history_capacity must be greater than 0");
        }
        if self.monitoring.alert_capacity == 0 {
            anyhow::bail!("monitoring.alert_capacity must be greater than 0");
        }
        if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            anyhow::bail!("endpoint must be a ws:// or wss:// URL: {}", self.endpoint);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connection: ConnectionConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}
