//! Configuration types for SnapKV
//!
//! Loaded from a TOML file; every section and key is optional and falls
//! back to its default. Unknown keys are ignored so configs can carry
//! deployment-specific extras without breaking startup.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration for SnapKV
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub server: ServerConfig,
    pub async_task: AsyncTaskConfig,
    pub meta_data_store: MetaStoreConfig,
    pub kv_store: KvStoreConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `Error::Configuration` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| Error::configuration(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load from the given path, or fall back to defaults when the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Listen port for the HTTP API
    pub port: u16,
    /// Path prefix all routes are nested under (empty = root)
    pub context_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            context_root: String::new(),
        }
    }
}

/// Async worker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AsyncTaskConfig {
    /// Sleep between empty queue polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Queue topic the orchestrator and workers exchange actions on
    pub operations_topic: String,
    /// Number of worker loops to run
    pub workers: usize,
}

impl AsyncTaskConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for AsyncTaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            operations_topic: "snapkv-operations".to_string(),
            workers: 1,
        }
    }
}

/// Which backend implementation a store handle is built on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendType {
    InMemory,
    RemoteDocStore,
}

impl Default for BackendType {
    fn default() -> Self {
        Self::InMemory
    }
}

/// Metadata store backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MetaStoreConfig {
    #[serde(rename = "type")]
    pub backend: BackendType,
    /// Document table holding dataset records
    pub dataset_table: String,
    /// Document table holding version records
    pub version_table: String,
}

impl Default for MetaStoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            dataset_table: "snapkv-datasets".to_string(),
            version_table: "snapkv-versions".to_string(),
        }
    }
}

/// Entry (KV) store backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KvStoreConfig {
    #[serde(rename = "type")]
    pub backend: BackendType,
    /// Document table holding entries
    pub table: String,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            table: "snapkv-entries".to_string(),
        }
    }
}

/// Durable queue backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueConfig {
    #[serde(rename = "type")]
    pub backend: BackendType,
    /// Exclusive ownership window for a reserved message, in milliseconds
    pub lease_time_ms: u64,
    /// Document table holding queue messages
    pub table: String,
}

impl QueueConfig {
    #[must_use]
    pub const fn lease_time(&self) -> Duration {
        Duration::from_millis(self.lease_time_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            lease_time_ms: 60_000,
            table: "snapkv-queue".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Default tracing filter (overridden by `RUST_LOG`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
