//! Shared application state

use std::sync::Arc;

use anyhow::Result;

use crate::application::ports::outbound::{QuotaLedgerPort, StorageEventRepositoryPort};
use crate::application::services::{
    StorageEventPublisher, StorageProjectionServiceImpl, StorageServiceImpl, WorldLocks,
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::event_bus::InProcessEventBus;
use crate::infrastructure::persistence::StorageFactory;

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    /// In-process subscribers (event log worker) attach here
    pub event_bus: InProcessEventBus,
    // Application services
    pub storage_service: StorageServiceImpl,
    pub projection_service: StorageProjectionServiceImpl,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let factory = StorageFactory::new(config.storage.clone()).await?;
        let ledger = factory.create_ledger().await?;
        let events = factory.create_event_repository().await?;

        Ok(Self::from_parts(config, ledger, events))
    }

    /// Wire the services on top of already created adapters
    pub fn from_parts(
        config: AppConfig,
        ledger: Arc<dyn QuotaLedgerPort>,
        events: Arc<dyn StorageEventRepositoryPort>,
    ) -> Self {
        let event_bus = InProcessEventBus::new(config.storage.event_bus_capacity);
        let publisher = Arc::new(
            StorageEventPublisher::new(events.clone(), Arc::new(event_bus.clone())).with_retry(
                config.storage.publish_retry_attempts,
                config.storage.publish_retry_backoff(),
            ),
        );

        // Both services share the locks so rebuilds never interleave with writes
        let world_locks = WorldLocks::new();
        let storage_service = StorageServiceImpl::new(
            ledger.clone(),
            publisher,
            world_locks.clone(),
            config.storage.default_allocated_bytes,
        );
        let projection_service = StorageProjectionServiceImpl::new(ledger, events, world_locks);

        Self {
            config,
            event_bus,
            storage_service,
            projection_service,
        }
    }
}
