// src/settings.rs
//
// Bridge settings, read from TOML.
//
//   host = "192.168.1.200"
//   port = 20001
//   reconnect = true
//   backoff_ms = 1000
//   connect_timeout_ms = 5000

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::{ConnectOptions, IoError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    /// Gateway hostname or IP
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// None = retry forever
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Directory for timestamped log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    20001 // Waveshare TCP server default
}
fn default_reconnect() -> bool {
    true
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_channel_capacity() -> usize {
    256
}

impl BridgeSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            reconnect: default_reconnect(),
            backoff_ms: default_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_reconnect_attempts: None,
            channel_capacity: default_channel_capacity(),
            log_dir: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, IoError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IoError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, IoError> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| IoError::configuration(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), IoError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| IoError::configuration(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            IoError::configuration(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    pub fn validate(&self) -> Result<(), IoError> {
        if self.host.trim().is_empty() {
            return Err(IoError::configuration("host must not be empty"));
        }
        if self.port == 0 {
            return Err(IoError::configuration("port must be 1-65535"));
        }
        if self.channel_capacity == 0 {
            return Err(IoError::configuration("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn to_connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            reconnect: self.reconnect,
            backoff: Duration::from_millis(self.backoff_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            channel_capacity: self.channel_capacity,
        }
    }
}
