//! Configuration sections shared by every connector binary.
//!
//! Connectors embed these sections in their own top-level config struct and
//! read it with [`load_config`].

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// Re-export existing config types
pub use crate::nats::NatsConfig;

/// Offset storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OffsetConfig {
    /// SQLite database file holding committed offsets
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// How often staged offsets are flushed (milliseconds)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Upper bound for one flush (milliseconds)
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

fn default_db_path() -> String {
    "offsets.db".to_string()
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

impl OffsetConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            flush_interval_ms: default_flush_interval_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

/// Status API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    std::env::var("CONNECTOR_API_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
