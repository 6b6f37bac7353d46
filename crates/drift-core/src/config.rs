//! Configuration system for drift.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DRIFT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/drift/config.toml
//!   3. ~/.config/drift/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a relay node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub node: NodeConfig,
    pub bus: BusConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the websocket listener binds. Port 0 = OS-assigned.
    pub listen_addr: String,
    /// Fixed node id (32 hex chars). Empty = random per start.
    pub id: String,
    /// How long a connecting client has to declare its identity.
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Shared topic name, one per deployment.
    pub topic: String,
    /// Retention bound for bus messages.
    pub max_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Tick period of the liveness supervisor.
    pub interval_secs: u64,
    /// An unanswered ping older than this evicts the connection.
    pub max_wait_secs: u64,
}

impl NodeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            id: String::new(),
            handshake_timeout_ms: 100,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: "drift.chat".to_string(),
            max_age_hours: 20,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            max_wait_secs: 10,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("drift")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RelayConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RelayConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DRIFT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply DRIFT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DRIFT_NODE__LISTEN_ADDR") {
            self.node.listen_addr = v;
        }
        if let Ok(v) = std::env::var("DRIFT_NODE__ID") {
            self.node.id = v;
        }
        if let Ok(v) = std::env::var("DRIFT_NODE__HANDSHAKE_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.node.handshake_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("DRIFT_BUS__TOPIC") {
            self.bus.topic = v;
        }
        if let Ok(v) = std::env::var("DRIFT_BUS__MAX_AGE_HOURS") {
            if let Ok(hours) = v.parse() {
                self.bus.max_age_hours = hours;
            }
        }
        if let Ok(v) = std::env::var("DRIFT_HEARTBEAT__INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.heartbeat.interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("DRIFT_HEARTBEAT__MAX_WAIT_SECS") {
            if let Ok(secs) = v.parse() {
                self.heartbeat.max_wait_secs = secs;
            }
        }
    }
}
