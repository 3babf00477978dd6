//! Storage Service - Application service for storage quota accounting
//!
//! Command handlers call this service after they create, change, delete or
//! restore a stored entity. The service turns the size change into a delta,
//! applies it to the world's quota ledger and publishes exactly one
//! `EntityStoredEvent` per successful change.
//!
//! A change whose event cannot be recorded is undone before the error is
//! returned, so a failed call leaves neither the ledger nor the log changed.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::application::ports::outbound::{EventStoreError, LedgerError, QuotaLedgerPort};
use crate::application::services::storage_event_publisher::StorageEventPublisher;
use crate::application::services::world_locks::WorldLocks;
use crate::domain::aggregates::{QuotaError, QuotaLedger};
use crate::domain::entities::{StorageKey, StoredEntity, StoredEntitySnapshot};
use crate::domain::events::{
    AllocationIncreasedEvent, EntityStoredEvent, EventMetadata, StorageInitializedEvent,
};
use crate::domain::value_objects::WorldId;

/// Errors surfaced by storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0}")]
    QuotaExceeded(QuotaError),

    #[error("Storage already initialized for world {0}")]
    AlreadyInitialized(WorldId),

    #[error("Storage not initialized for world {0}")]
    NotInitialized(WorldId),

    /// A delta larger than current usage; the caller passed a wrong previous size
    #[error("{0}")]
    NegativeResultingUsage(QuotaError),

    #[error("{0}")]
    InvalidAllocation(QuotaError),

    #[error("Invalid size {size} for {key}: sizes cannot be negative")]
    InvalidSize { key: StorageKey, size: i64 },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<QuotaError> for StorageError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::QuotaExceeded { .. } => StorageError::QuotaExceeded(e),
            QuotaError::NegativeResultingUsage { .. } => StorageError::NegativeResultingUsage(e),
            QuotaError::InvalidAllocation { .. } => StorageError::InvalidAllocation(e),
        }
    }
}

impl From<LedgerError> for StorageError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AlreadyInitialized(id) => StorageError::AlreadyInitialized(id),
            LedgerError::NotInitialized(id) => StorageError::NotInitialized(id),
            LedgerError::Quota(q) => q.into(),
            LedgerError::Database { operation, message } => {
                StorageError::Ledger(format!("{} failed: {}", operation, message))
            }
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Task(e.to_string())
    }
}

/// Result of a store-like call
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// The delta was applied and this event was published
    Stored(EntityStoredEvent),
    /// The size did not change; neither the ledger nor the log was touched
    Unchanged { key: StorageKey, size: i64 },
}

/// Storage service trait defining the application use cases
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Grant a world its quota. `None` uses the configured default allocation.
    async fn initialize(
        &self,
        world_id: WorldId,
        allocated_bytes: Option<i64>,
    ) -> Result<QuotaLedger, StorageError>;

    /// Raise a world's quota
    async fn increase_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, StorageError>;

    /// Account for an entity whose size moved from `previous_size` to its current size
    async fn store(
        &self,
        entity: &dyn StoredEntity,
        previous_size: i64,
    ) -> Result<StoreOutcome, StorageError>;

    /// Add an undeleted or recreated entity back in full
    async fn restore(&self, entity: &dyn StoredEntity) -> Result<StoreOutcome, StorageError>;

    /// Release a deleted entity's full footprint
    async fn discard(&self, entity: &dyn StoredEntity) -> Result<StoreOutcome, StorageError>;

    /// Current ledger of a world
    async fn usage(&self, world_id: WorldId) -> Result<QuotaLedger, StorageError>;

    /// Ledgers of every world
    async fn list_usage(&self) -> Result<Vec<QuotaLedger>, StorageError>;
}

/// Default implementation of StorageService using port abstractions
#[derive(Clone)]
pub struct StorageServiceImpl {
    ledger: Arc<dyn QuotaLedgerPort>,
    publisher: Arc<StorageEventPublisher>,
    world_locks: WorldLocks,
    default_allocated_bytes: i64,
}

impl StorageServiceImpl {
    /// Create a new StorageServiceImpl
    pub fn new(
        ledger: Arc<dyn QuotaLedgerPort>,
        publisher: Arc<StorageEventPublisher>,
        world_locks: WorldLocks,
        default_allocated_bytes: i64,
    ) -> Self {
        Self {
            ledger,
            publisher,
            world_locks,
            default_allocated_bytes,
        }
    }

    fn validate_sizes(entity: &StoredEntitySnapshot, previous_size: i64) -> Result<(), StorageError> {
        for size in [entity.size, previous_size] {
            if size < 0 {
                return Err(StorageError::InvalidSize {
                    key: entity.key(),
                    size,
                });
            }
        }
        Ok(())
    }

    /// Commit `delta` to the ledger and publish the resulting event, as one
    /// detached unit serialized with every other write to the same world.
    async fn apply_and_publish(
        &self,
        entity: StoredEntitySnapshot,
        delta: i64,
    ) -> Result<EntityStoredEvent, StorageError> {
        let ledger = self.ledger.clone();
        let publisher = self.publisher.clone();
        let world_id = entity.world_id;

        self.world_locks
            .run_detached(world_id, async move {
                let used_bytes_after = ledger.apply(world_id, delta).await?;

                let event = EntityStoredEvent {
                    metadata: EventMetadata::default(),
                    world_id,
                    entity_type: entity.entity_type,
                    entity_id: entity.entity_id,
                    size: entity.size,
                    used_bytes_after,
                };

                if let Err(e) = publisher.publish(event.clone().into()).await {
                    undo_unrecorded(world_id, "store", async {
                        ledger.apply(world_id, -delta).await.map(|_| ())
                    })
                    .await;
                    return Err(StorageError::from(e));
                }

                Ok::<_, StorageError>(event)
            })
            .await?
    }

    fn log_failure(key: &StorageKey, delta: i64, error: &StorageError) {
        match error {
            StorageError::NegativeResultingUsage(_) => {
                error!(key = %key, delta, "Storage delta exceeds current usage: {}", error)
            }
            StorageError::QuotaExceeded(_) => {
                warn!(key = %key, delta, "Storage quota exceeded: {}", error)
            }
            _ => error!(key = %key, delta, "Failed to store entity: {}", error),
        }
    }
}

/// Undo a committed ledger change whose event never reached the log, so a
/// caller retrying the failed call is not counted twice
async fn undo_unrecorded<F>(world_id: WorldId, change: &'static str, undo: F)
where
    F: Future<Output = Result<(), LedgerError>>,
{
    match undo.await {
        Ok(()) => warn!(
            world_id = %world_id,
            change,
            "Storage event not recorded, ledger change reverted"
        ),
        Err(e) => error!(
            world_id = %world_id,
            change,
            "Storage event not recorded and ledger revert failed, ledger is ahead of the log: {}",
            e
        ),
    }
}

#[async_trait]
impl StorageService for StorageServiceImpl {
    #[instrument(skip(self))]
    async fn initialize(
        &self,
        world_id: WorldId,
        allocated_bytes: Option<i64>,
    ) -> Result<QuotaLedger, StorageError> {
        let allocated_bytes = allocated_bytes.unwrap_or(self.default_allocated_bytes);
        debug!(world_id = %world_id, allocated_bytes, "Initializing storage");

        let ledger = self.ledger.clone();
        let publisher = self.publisher.clone();
        let entry = self
            .world_locks
            .run_detached(world_id, async move {
                let entry = ledger.initialize(world_id, allocated_bytes).await?;
                let event = StorageInitializedEvent {
                    metadata: EventMetadata::default(),
                    owner_id: world_id,
                    allocated_bytes,
                };
                if let Err(e) = publisher.publish(event.into()).await {
                    undo_unrecorded(world_id, "initialize", ledger.remove(world_id)).await;
                    return Err(StorageError::from(e));
                }
                Ok::<_, StorageError>(entry)
            })
            .await??;

        info!(world_id = %world_id, allocated_bytes, "Initialized storage");
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn increase_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, StorageError> {
        debug!(world_id = %world_id, allocated_bytes, "Increasing storage allocation");

        let ledger = self.ledger.clone();
        let publisher = self.publisher.clone();
        let entry = self
            .world_locks
            .run_detached(world_id, async move {
                let previous = ledger
                    .get(world_id)
                    .await?
                    .ok_or(StorageError::NotInitialized(world_id))?;
                let entry = ledger.increase_allocation(world_id, allocated_bytes).await?;
                let event = AllocationIncreasedEvent {
                    metadata: EventMetadata::default(),
                    world_id,
                    allocated_bytes: entry.allocated_bytes,
                };
                if let Err(e) = publisher.publish(event.into()).await {
                    undo_unrecorded(world_id, "increase_allocation", async {
                        ledger
                            .revert_allocation(world_id, previous.allocated_bytes)
                            .await
                            .map(|_| ())
                    })
                    .await;
                    return Err(StorageError::from(e));
                }
                Ok::<_, StorageError>(entry)
            })
            .await??;

        info!(world_id = %world_id, allocated_bytes, "Increased storage allocation");
        Ok(entry)
    }

    #[instrument(skip(self, entity), fields(world_id = %entity.world_id(), key = %entity.key()))]
    async fn store(
        &self,
        entity: &dyn StoredEntity,
        previous_size: i64,
    ) -> Result<StoreOutcome, StorageError> {
        let entity = StoredEntitySnapshot::of(entity);
        Self::validate_sizes(&entity, previous_size)?;

        let key = entity.key();
        let delta = entity.size - previous_size;
        if delta == 0 {
            debug!(size = entity.size, "Entity size unchanged, skipping ledger");
            return Ok(StoreOutcome::Unchanged {
                key,
                size: entity.size,
            });
        }

        match self.apply_and_publish(entity, delta).await {
            Ok(event) => {
                info!(
                    size = event.size,
                    delta,
                    used_bytes = event.used_bytes_after,
                    "Stored entity"
                );
                Ok(StoreOutcome::Stored(event))
            }
            Err(e) => {
                Self::log_failure(&key, delta, &e);
                Err(e)
            }
        }
    }

    async fn restore(&self, entity: &dyn StoredEntity) -> Result<StoreOutcome, StorageError> {
        self.store(entity, 0).await
    }

    async fn discard(&self, entity: &dyn StoredEntity) -> Result<StoreOutcome, StorageError> {
        let released = StoredEntitySnapshot::of(entity).with_size(0);
        self.store(&released, entity.size()).await
    }

    #[instrument(skip(self))]
    async fn usage(&self, world_id: WorldId) -> Result<QuotaLedger, StorageError> {
        self.ledger
            .get(world_id)
            .await?
            .ok_or(StorageError::NotInitialized(world_id))
    }

    #[instrument(skip(self))]
    async fn list_usage(&self) -> Result<Vec<QuotaLedger>, StorageError> {
        Ok(self.ledger.list().await?)
    }
}
