//! Server configuration.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::session::SessionConfig;
use crate::{
    DEFAULT_CLOCK_CHECK_INTERVAL_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_INBOUND_QUEUE_CAPACITY,
    DEFAULT_INCREMENT_MS, DEFAULT_INITIAL_CLOCK_MS, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_FRAME_BYTES,
    DEFAULT_OUTBOUND_QUEUE_CAPACITY, MAX_CLOCK_CHECK_INTERVAL_MS,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One accepted bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: String,
    pub display_name: String,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub initial_clock_ms: u64,
    pub increment_ms: u64,
    pub clock_check_interval_ms: u64,
    pub outbound_queue_capacity: usize,
    pub inbound_queue_capacity: usize,
    pub max_frame_bytes: usize,
    pub handshake_timeout_ms: u64,
    /// Directory for record files. Records stay in memory when unset.
    pub record_dir: Option<PathBuf>,
    pub tokens: Vec<TokenEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(DEFAULT_LISTEN_ADDR),
            initial_clock_ms: DEFAULT_INITIAL_CLOCK_MS,
            increment_ms: DEFAULT_INCREMENT_MS,
            clock_check_interval_ms: DEFAULT_CLOCK_CHECK_INTERVAL_MS,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            record_dir: None,
            tokens: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_clock_ms == 0 {
            return Err(ConfigError::Invalid("initial_clock_ms must be > 0".into()));
        }
        if !(1..=MAX_CLOCK_CHECK_INTERVAL_MS).contains(&self.clock_check_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "clock_check_interval_ms must be in 1..={MAX_CLOCK_CHECK_INTERVAL_MS}"
            )));
        }
        if self.outbound_queue_capacity == 0 || self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be > 0".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be > 0".into()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid("handshake_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            initial_clock_ms: self.initial_clock_ms,
            increment_ms: self.increment_ms,
        }
    }

    pub fn clock_check_interval(&self) -> Duration {
        Duration::from_millis(self.clock_check_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
