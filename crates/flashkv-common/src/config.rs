//! Configuration types for FlashKV
//!
//! This module defines configuration structures used across components.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for FlashKV
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
    /// TCP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Storage engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for disk shards; created if absent
    pub data_dir: PathBuf,
    /// Maximum cache entries before eviction triggers
    pub cache_size: usize,
    /// Seconds between background flush passes (fractional allowed)
    pub flush_interval_secs: f64,
    /// Upper bound on concurrent disk I/O workers
    pub max_workers: usize,
    /// Suffix for shard files
    pub file_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./flashkv-data"),
            cache_size: 10_000,
            flush_interval_secs: 5.0,
            max_workers: 4,
            file_extension: ".fkv".to_string(),
        }
    }
}

impl EngineConfig {
    /// Flush interval as a [`Duration`]
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs_f64(self.flush_interval_secs.max(0.0))
    }
}

/// TCP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum concurrent client connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6380,
            max_connections: 100,
        }
    }
}

impl ServerConfig {
    /// Listen address in `host:port` form
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
