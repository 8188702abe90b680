//! Configuration for the bmcmond daemon
//!
//! Loads configuration from a TOML file. The node roster is supplied here at
//! startup and is not reloaded while the daemon runs.

use crate::error::Result;
use crate::fleet::{AccessType, NodeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Node roster: one `[[nodes]]` entry per managed node
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// Fleet-wide session and shard tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetConfig {
    /// Maximum nodes owned by one shard
    #[serde(default = "default_shard_size")]
    pub shard_size: usize,
    /// How often each shard publishes its local snapshot into the store (ms)
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    /// No-message window after which a live session is torn down (seconds)
    #[serde(default = "default_stale_window_secs")]
    pub stale_window_secs: u64,
    /// Consecutive failures tolerated before a node is marked down
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Minimum spacing between reconnect attempts for one node (seconds)
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Sensor paths to subscribe and seed; the built-in set is used when empty
    #[serde(default)]
    pub sensor_paths: Vec<String>,
}

/// Controller access tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Deadline for login/enumerate/power-state calls (seconds)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

/// Client-facing streaming server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// TCP bind address for the snapshot streaming protocol
    ///
    /// Examples:
    /// - `0.0.0.0:53322` - All interfaces (default)
    /// - `127.0.0.1:53322` - Localhost only
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Internal server poll granularity (ms); client cadences are floored here
    #[serde(default = "default_server_tick_ms")]
    pub server_tick_ms: u64,
    /// Snapshot cadence for clients that never send a filter frame (ms)
    #[serde(default = "default_cadence_ms")]
    pub default_cadence_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_shard_size() -> usize {
    50
}
fn default_publish_interval_ms() -> u64 {
    1000
}
fn default_stale_window_secs() -> u64 {
    60
}
fn default_retry_limit() -> u32 {
    3
}
fn default_retry_interval_secs() -> u64 {
    30
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_bind_address() -> String {
    "0.0.0.0:53322".to_string()
}
fn default_server_tick_ms() -> u64 {
    300
}
fn default_cadence_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            shard_size: default_shard_size(),
            publish_interval_ms: default_publish_interval_ms(),
            stale_window_secs: default_stale_window_secs(),
            retry_limit: default_retry_limit(),
            retry_interval_secs: default_retry_interval_secs(),
            sensor_paths: Vec::new(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            server_tick_ms: default_server_tick_ms(),
            default_cadence_ms: default_cadence_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fleet: FleetConfig::default(),
            controller: ControllerConfig::default(),
            streaming: StreamingConfig::default(),
            logging: LoggingConfig::default(),
            nodes: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&contents)?;
        for node in &mut config.nodes {
            node.apply_default_credentials();
        }
        Ok(config)
    }
}

impl NodeConfig {
    /// Fill in the historical per-access-type defaults when the roster entry
    /// omits credentials.
    pub fn apply_default_credentials(&mut self) {
        if self.username.is_none() || self.password.is_none() {
            let (user, pass) = match self.access {
                AccessType::Rest => ("root", "0penBmc"),
                AccessType::Ipmi => ("ADMIN", "ADMIN"),
            };
            self.username.get_or_insert_with(|| user.to_string());
            self.password.get_or_insert_with(|| pass.to_string());
        }
    }
}
