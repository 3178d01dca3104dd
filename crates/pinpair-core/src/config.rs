//! Configuration system for pinpair
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/pinpair/config.toml
//! - Linux: ~/.config/pinpair/config.toml
//! - Windows: %APPDATA%/pinpair/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{MAX_QUEUE_LEN, PEER_STALE_SECS, PIN_ATTEMPTS, ROOM_IDLE_SECS};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signal broker settings
    pub signal: SignalConfig,
}

/// Signal broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Bind address for both listeners
    pub bind: IpAddr,
    /// HTTP polling endpoint port
    pub http_port: u16,
    /// WebSocket push endpoint port
    pub ws_port: u16,
    /// SQLite database path for the polling endpoint (None = in-memory)
    pub db_path: Option<PathBuf>,
    /// Seconds a room may exist without a joiner
    pub room_idle_secs: u64,
    /// Seconds without an authorized request before a peer is stale
    pub peer_stale_secs: u64,
    /// Maximum queued messages per peer
    pub max_queue_len: usize,
    /// Attempts at drawing an unused room code
    pub pin_attempts: usize,
    /// Background sweep interval in seconds (0 = only sweep on requests)
    pub sweep_interval_secs: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8000,
            ws_port: 8080,
            db_path: None,
            room_idle_secs: ROOM_IDLE_SECS,
            peer_stale_secs: PEER_STALE_SECS,
            max_queue_len: MAX_QUEUE_LEN,
            pin_attempts: PIN_ATTEMPTS,
            sweep_interval_secs: 60,
        }
    }
}

impl SignalConfig {
    /// Runtime thresholds consumed by the room controller
    pub fn policy(&self) -> Policy {
        Policy {
            room_idle_secs: self.room_idle_secs,
            peer_stale_secs: Some(self.peer_stale_secs),
            max_queue_len: self.max_queue_len.max(1),
            pin_attempts: self.pin_attempts.max(1),
        }
    }
}

/// Thresholds and limits governing room lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub room_idle_secs: u64,
    /// `None` disables timestamp-based peer expiry (push binding)
    pub peer_stale_secs: Option<u64>,
    pub max_queue_len: usize,
    pub pin_attempts: usize,
}

impl Default for Policy {
    fn default() -> Self {
        SignalConfig::default().policy()
    }
}

impl Policy {
    /// Policy for bindings where liveness comes from the transport
    pub fn without_peer_expiry(self) -> Self {
        Self {
            peer_stale_secs: None,
            ..self
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "pinpair", "pinpair")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// I/O error
    Io(String),
    /// Parse error
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
