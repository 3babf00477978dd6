//! Storage factory - Creates ledger and event log adapters based on configuration
//!
//! `memory` keeps everything in process (development and tests), `sqlite`
//! persists ledgers and the event log in one database file.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::application::ports::outbound::{QuotaLedgerPort, StorageEventRepositoryPort};
use crate::infrastructure::config::StorageConfig;
use crate::infrastructure::persistence::{
    InMemoryQuotaLedger, InMemoryStorageEventRepository, SqliteQuotaLedgerRepository,
    SqliteStorageEventRepository,
};

pub struct StorageFactory {
    config: StorageConfig,
    sqlite_pool: Option<SqlitePool>,
}

impl StorageFactory {
    /// Create a new storage factory, connecting to SQLite when it is the backend
    pub async fn new(config: StorageConfig) -> Result<Self> {
        let sqlite_pool = if config.backend == "sqlite" {
            // Ensure data directory exists
            if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create storage database directory")?;
            }

            let options = SqliteConnectOptions::new()
                .filename(&config.sqlite_path)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .connect_with(options)
                .await
                .context("Failed to connect to SQLite storage database")?;
            tracing::info!("Connected to SQLite storage database: {}", config.sqlite_path);
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            config,
            sqlite_pool,
        })
    }

    fn pool(&self) -> Result<SqlitePool> {
        self.sqlite_pool
            .clone()
            .context("SQLite pool not initialized")
    }

    /// Create the quota ledger adapter
    pub async fn create_ledger(&self) -> Result<Arc<dyn QuotaLedgerPort>> {
        match self.config.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryQuotaLedger::new())),
            "sqlite" => {
                let ledger = SqliteQuotaLedgerRepository::new(self.pool()?)
                    .await
                    .context("Failed to prepare storage ledger table")?;
                Ok(Arc::new(ledger))
            }
            backend => anyhow::bail!("Unsupported storage backend: {}", backend),
        }
    }

    /// Create the storage event log adapter
    pub async fn create_event_repository(&self) -> Result<Arc<dyn StorageEventRepositoryPort>> {
        match self.config.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryStorageEventRepository::new())),
            "sqlite" => {
                let repository = SqliteStorageEventRepository::new(self.pool()?)
                    .await
                    .context("Failed to prepare storage event table")?;
                Ok(Arc::new(repository))
            }
            backend => anyhow::bail!("Unsupported storage backend: {}", backend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::WorldId;

    #[tokio::test]
    async fn test_memory_backend_needs_no_database() {
        let factory = StorageFactory::new(StorageConfig::default()).await.unwrap();
        let ledger = factory.create_ledger().await.unwrap();
        let world_id = WorldId::new();

        ledger.initialize(world_id, 10).await.unwrap();
        assert!(ledger.get(world_id).await.unwrap().is_some());
        assert!(factory.create_event_repository().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_backend_is_rejected() {
        let config = StorageConfig {
            backend: "postgres".into(),
            ..StorageConfig::default()
        };
        let factory = StorageFactory::new(config).await.unwrap();
        assert!(factory.create_ledger().await.is_err());
    }
}
