//! Application configuration

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP server port
    pub server_port: u16,

    /// Storage accounting configuration
    pub storage: StorageConfig,
}

/// Storage backend and accounting settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend type: "memory" or "sqlite"
    pub backend: String,
    /// SQLite database path (only used with the sqlite backend)
    pub sqlite_path: String,
    /// Allocation granted when a world is initialized without one
    pub default_allocated_bytes: i64,
    /// Event log append attempts before a write reports failure
    pub publish_retry_attempts: u32,
    /// Linear backoff step between append attempts
    pub publish_retry_backoff_ms: u64,
    /// Events buffered per in-process subscriber
    pub event_bus_capacity: usize,
    /// Seconds between background ledger audits; 0 disables the worker
    pub audit_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: "./data/storage.db".to_string(),
            default_allocated_bytes: 100 * 1024 * 1024,
            publish_retry_attempts: 3,
            publish_retry_backoff_ms: 50,
            event_bus_capacity: 1024,
            audit_interval_secs: 300,
        }
    }
}

impl StorageConfig {
    pub fn publish_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_retry_backoff_ms)
    }

    pub fn audit_interval(&self) -> Option<Duration> {
        (self.audit_interval_secs > 0).then(|| Duration::from_secs(self.audit_interval_secs))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} must be a valid number, got {:?}", name, value)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = StorageConfig::default();

        let backend = env::var("SKILLCRAFT_STORAGE_BACKEND").unwrap_or(defaults.backend);
        if !matches!(backend.as_str(), "memory" | "sqlite") {
            anyhow::bail!(
                "SKILLCRAFT_STORAGE_BACKEND must be \"memory\" or \"sqlite\", got {:?}",
                backend
            );
        }

        let default_allocated_bytes = parse_var(
            "SKILLCRAFT_DEFAULT_ALLOCATED_BYTES",
            defaults.default_allocated_bytes,
        )?;
        if default_allocated_bytes < 0 {
            anyhow::bail!("SKILLCRAFT_DEFAULT_ALLOCATED_BYTES cannot be negative");
        }

        Ok(Self {
            server_port: parse_var("SKILLCRAFT_SERVER_PORT", 3000)
                .context("SKILLCRAFT_SERVER_PORT must be a valid port number")?,
            storage: StorageConfig {
                backend,
                sqlite_path: env::var("SKILLCRAFT_SQLITE_PATH").unwrap_or(defaults.sqlite_path),
                default_allocated_bytes,
                publish_retry_attempts: parse_var(
                    "SKILLCRAFT_PUBLISH_RETRY_ATTEMPTS",
                    defaults.publish_retry_attempts,
                )?,
                publish_retry_backoff_ms: parse_var(
                    "SKILLCRAFT_PUBLISH_RETRY_BACKOFF_MS",
                    defaults.publish_retry_backoff_ms,
                )?,
                event_bus_capacity: parse_var(
                    "SKILLCRAFT_EVENT_BUS_CAPACITY",
                    defaults.event_bus_capacity,
                )?,
                audit_interval_secs: parse_var(
                    "SKILLCRAFT_AUDIT_INTERVAL_SECS",
                    defaults.audit_interval_secs,
                )?,
            },
        })
    }
}
