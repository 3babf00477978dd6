//! Storage Projection Service - Rebuild and audit ledgers from the event log
//!
//! Used for recovery and audits, never on the request path of a write. Both
//! operations take the world's write lock so they see a ledger and a history
//! that belong to the same commit.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::application::ports::outbound::{
    QuotaLedgerPort, RecordedEvent, StorageEventRepositoryPort,
};
use crate::application::services::storage_service::StorageError;
use crate::application::services::world_locks::WorldLocks;
use crate::domain::aggregates::QuotaLedger;
use crate::domain::events::EntityStoredEvent;
use crate::domain::services::{recompute_used_bytes, replay_used_bytes, StorageProjection};
use crate::domain::value_objects::WorldId;

/// Worlds audited at the same time by `audit_all`
const MAX_CONCURRENT_AUDITS: usize = 8;

/// Comparison of a live ledger against its event history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageAudit {
    pub world_id: WorldId,
    pub allocated_bytes: i64,
    /// Allocation granted by the latest initialize or increase event
    pub logged_allocated_bytes: Option<i64>,
    /// Usage held by the live ledger
    pub ledger_used_bytes: i64,
    /// Usage recorded by the last stored event
    pub replayed_used_bytes: i64,
    /// Sum of the latest size per stored entity
    pub recomputed_used_bytes: i64,
    pub stored_entities: usize,
    pub events_applied: usize,
    pub consistent: bool,
}

impl StorageAudit {
    fn new(ledger: &QuotaLedger, projection: &StorageProjection) -> Self {
        let replayed = projection.replayed_used_bytes();
        let recomputed = projection.recomputed_used_bytes();
        let logged_allocated_bytes = projection.allocated_bytes();
        Self {
            world_id: ledger.world_id,
            allocated_bytes: ledger.allocated_bytes,
            logged_allocated_bytes,
            ledger_used_bytes: ledger.used_bytes,
            replayed_used_bytes: replayed,
            recomputed_used_bytes: recomputed,
            stored_entities: projection.stored_entity_count(),
            events_applied: projection.events_applied(),
            consistent: ledger.used_bytes == replayed
                && replayed == recomputed
                && logged_allocated_bytes == Some(ledger.allocated_bytes),
        }
    }
}

#[async_trait]
pub trait StorageProjectionService: Send + Sync {
    /// A world's events in append order
    async fn history(&self, world_id: WorldId) -> Result<Vec<RecordedEvent>, StorageError>;

    /// Events of all worlds after `last_sequence`, for subscribers catching up
    async fn events_since(
        &self,
        last_sequence: i64,
        limit: u32,
    ) -> Result<Vec<RecordedEvent>, StorageError>;

    /// Reset the ledger's usage from the world's event history
    async fn rebuild(&self, world_id: WorldId) -> Result<QuotaLedger, StorageError>;

    /// Compare the ledger with its history without changing anything
    async fn audit(&self, world_id: WorldId) -> Result<StorageAudit, StorageError>;

    /// Audit every initialized world
    async fn audit_all(&self) -> Result<Vec<StorageAudit>, StorageError>;
}

#[derive(Clone)]
pub struct StorageProjectionServiceImpl {
    ledger: Arc<dyn QuotaLedgerPort>,
    events: Arc<dyn StorageEventRepositoryPort>,
    world_locks: WorldLocks,
}

impl StorageProjectionServiceImpl {
    pub fn new(
        ledger: Arc<dyn QuotaLedgerPort>,
        events: Arc<dyn StorageEventRepositoryPort>,
        world_locks: WorldLocks,
    ) -> Self {
        Self {
            ledger,
            events,
            world_locks,
        }
    }
}

#[async_trait]
impl StorageProjectionService for StorageProjectionServiceImpl {
    #[instrument(skip(self))]
    async fn history(&self, world_id: WorldId) -> Result<Vec<RecordedEvent>, StorageError> {
        Ok(self.events.list_for_world(world_id).await?)
    }

    #[instrument(skip(self))]
    async fn events_since(
        &self,
        last_sequence: i64,
        limit: u32,
    ) -> Result<Vec<RecordedEvent>, StorageError> {
        Ok(self.events.fetch_since(last_sequence, limit).await?)
    }

    #[instrument(skip(self))]
    async fn rebuild(&self, world_id: WorldId) -> Result<QuotaLedger, StorageError> {
        let ledger = self.ledger.clone();
        let events = self.events.clone();

        let rebuilt = self
            .world_locks
            .run_detached(world_id, async move {
                let before = ledger
                    .get(world_id)
                    .await?
                    .ok_or(StorageError::NotInitialized(world_id))?;
                let history = events.list_for_world(world_id).await?;
                let stored: Vec<EntityStoredEvent> = history
                    .iter()
                    .filter_map(RecordedEvent::as_entity_stored)
                    .cloned()
                    .collect();

                let recomputed = recompute_used_bytes(&stored);
                let replayed = replay_used_bytes(&stored);
                if recomputed != replayed {
                    warn!(
                        world_id = %world_id,
                        replayed,
                        recomputed,
                        "Storage event history has a gap, rebuilding from the last recorded usage"
                    );
                }

                let rebuilt = ledger.rebuild(world_id, &stored).await?;
                if rebuilt.used_bytes != before.used_bytes {
                    warn!(
                        world_id = %world_id,
                        before = before.used_bytes,
                        after = rebuilt.used_bytes,
                        "Rebuild corrected ledger usage"
                    );
                }
                Ok::<_, StorageError>(rebuilt)
            })
            .await??;

        info!(world_id = %world_id, used_bytes = rebuilt.used_bytes, "Rebuilt storage ledger");
        Ok(rebuilt)
    }

    #[instrument(skip(self))]
    async fn audit(&self, world_id: WorldId) -> Result<StorageAudit, StorageError> {
        let ledger = self.ledger.clone();
        let events = self.events.clone();

        let audit = self
            .world_locks
            .run_detached(world_id, async move {
                let entry = ledger
                    .get(world_id)
                    .await?
                    .ok_or(StorageError::NotInitialized(world_id))?;
                let history = events.list_for_world(world_id).await?;
                let projection =
                    StorageProjection::from_events(world_id, history.iter().map(|r| &r.event));
                Ok::<_, StorageError>(StorageAudit::new(&entry, &projection))
            })
            .await??;

        debug!(world_id = %world_id, consistent = audit.consistent, "Audited storage ledger");
        Ok(audit)
    }

    #[instrument(skip(self))]
    async fn audit_all(&self) -> Result<Vec<StorageAudit>, StorageError> {
        let entries = self.ledger.list().await?;
        stream::iter(entries)
            .map(|entry| self.audit(entry.world_id))
            .buffered(MAX_CONCURRENT_AUDITS)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::storage_event_publisher::StorageEventPublisher;
    use crate::application::services::storage_service::{StorageService, StorageServiceImpl};
    use crate::domain::entities::StoredEntitySnapshot;
    use crate::domain::events::{EventMetadata, StorageEvent};
    use crate::domain::value_objects::{EntityId, EntityType};
    use crate::infrastructure::event_bus::InProcessEventBus;
    use crate::infrastructure::persistence::{InMemoryQuotaLedger, InMemoryStorageEventRepository};

    struct Harness {
        storage: StorageServiceImpl,
        projection: StorageProjectionServiceImpl,
        ledger: Arc<InMemoryQuotaLedger>,
        events: Arc<InMemoryStorageEventRepository>,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(InMemoryQuotaLedger::new());
        let events = Arc::new(InMemoryStorageEventRepository::new());
        let locks = WorldLocks::new();
        let publisher = Arc::new(StorageEventPublisher::new(
            events.clone(),
            Arc::new(InProcessEventBus::new(64)),
        ));
        Harness {
            storage: StorageServiceImpl::new(ledger.clone(), publisher, locks.clone(), 1000),
            projection: StorageProjectionServiceImpl::new(ledger.clone(), events.clone(), locks),
            ledger,
            events,
        }
    }

    fn entity(world_id: WorldId, size: i64) -> StoredEntitySnapshot {
        StoredEntitySnapshot::new(world_id, EntityType::Lineage, EntityId::new(), size)
    }

    #[tokio::test]
    async fn test_rebuild_matches_live_ledger_at_every_step() {
        let h = harness();
        let world_id = WorldId::new();
        h.storage.initialize(world_id, None).await.unwrap();

        let a = entity(world_id, 400);
        let b = entity(world_id, 150);
        let steps: Vec<(StoredEntitySnapshot, i64)> = vec![
            (a.clone(), 0),
            (a.with_size(700), 400),
            (b.clone(), 0),
            (a.with_size(0), 700),
            (b.with_size(20), 150),
        ];

        for (snapshot, previous) in steps {
            h.storage.store(&snapshot, previous).await.unwrap();
            let live = h.storage.usage(world_id).await.unwrap().used_bytes;

            let audit = h.projection.audit(world_id).await.unwrap();
            assert!(audit.consistent, "{:?}", audit);
            assert_eq!(audit.replayed_used_bytes, live);

            let rebuilt = h.projection.rebuild(world_id).await.unwrap();
            assert_eq!(rebuilt.used_bytes, live);
        }
    }

    #[tokio::test]
    async fn test_rebuild_repairs_a_drifted_ledger() {
        let h = harness();
        let world_id = WorldId::new();
        h.storage.initialize(world_id, None).await.unwrap();
        h.storage.restore(&entity(world_id, 300)).await.unwrap();

        // Usage changed behind the service's back
        h.ledger.apply(world_id, 200).await.unwrap();
        let audit = h.projection.audit(world_id).await.unwrap();
        assert!(!audit.consistent);
        assert_eq!(audit.ledger_used_bytes, 500);
        assert_eq!(audit.replayed_used_bytes, 300);

        let rebuilt = h.projection.rebuild(world_id).await.unwrap();
        assert_eq!(rebuilt.used_bytes, 300);
        assert!(h.projection.audit(world_id).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_audit_detects_a_gap_in_the_log() {
        let h = harness();
        let world_id = WorldId::new();
        h.storage.initialize(world_id, None).await.unwrap();
        h.storage.restore(&entity(world_id, 100)).await.unwrap();

        // An event whose predecessor never made it to the log
        h.events
            .append(&StorageEvent::from(EntityStoredEvent {
                metadata: EventMetadata::default(),
                world_id,
                entity_type: EntityType::Item,
                entity_id: EntityId::new(),
                size: 40,
                used_bytes_after: 190,
            }))
            .await
            .unwrap();

        let audit = h.projection.audit(world_id).await.unwrap();
        assert_eq!(audit.replayed_used_bytes, 190);
        assert_eq!(audit.recomputed_used_bytes, 140);
        assert!(!audit.consistent);
    }

    #[tokio::test]
    async fn test_unknown_world_is_not_initialized() {
        let h = harness();
        let err = h.projection.rebuild(WorldId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized(_)));
        let err = h.projection.audit(WorldId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_audit_all_covers_every_world() {
        let h = harness();
        let worlds = [WorldId::new(), WorldId::new(), WorldId::new()];
        for world_id in worlds {
            h.storage.initialize(world_id, None).await.unwrap();
            h.storage.restore(&entity(world_id, 10)).await.unwrap();
        }

        let audits = h.projection.audit_all().await.unwrap();

        assert_eq!(audits.len(), 3);
        assert!(audits.iter().all(|a| a.consistent && a.ledger_used_bytes == 10));
    }

    #[tokio::test]
    async fn test_audit_all_handles_more_worlds_than_run_at_once() {
        let h = harness();
        let worlds: Vec<WorldId> = (0..MAX_CONCURRENT_AUDITS * 3).map(|_| WorldId::new()).collect();
        for world_id in &worlds {
            h.storage.initialize(*world_id, None).await.unwrap();
        }

        let audits = h.projection.audit_all().await.unwrap();

        let mut audited: Vec<WorldId> = audits.iter().map(|a| a.world_id).collect();
        audited.sort();
        let mut expected = worlds.clone();
        expected.sort();
        assert_eq!(audited, expected);
    }

    #[tokio::test]
    async fn test_audit_detects_an_allocation_missing_from_the_log() {
        let h = harness();
        let world_id = WorldId::new();
        h.storage.initialize(world_id, Some(100)).await.unwrap();

        // Allocation raised behind the service's back
        h.ledger.increase_allocation(world_id, 900).await.unwrap();

        let audit = h.projection.audit(world_id).await.unwrap();
        assert_eq!(audit.allocated_bytes, 900);
        assert_eq!(audit.logged_allocated_bytes, Some(100));
        assert!(!audit.consistent);
    }

    #[tokio::test]
    async fn test_history_is_in_append_order() {
        let h = harness();
        let world_id = WorldId::new();
        h.storage.initialize(world_id, None).await.unwrap();
        h.storage.restore(&entity(world_id, 1)).await.unwrap();
        h.storage.increase_allocation(world_id, 2000).await.unwrap();

        let history = h.projection.history(world_id).await.unwrap();
        let types: Vec<&str> = history.iter().map(|r| r.event.event_type()).collect();
        assert_eq!(
            types,
            vec!["StorageInitialized", "EntityStored", "AllocationIncreased"]
        );
        assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn test_events_since_spans_worlds() {
        let h = harness();
        let (a, b) = (WorldId::new(), WorldId::new());
        h.storage.initialize(a, None).await.unwrap();
        h.storage.initialize(b, None).await.unwrap();
        h.storage.restore(&entity(a, 5)).await.unwrap();

        let first = h.projection.events_since(0, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = h
            .projection
            .events_since(first[1].sequence, 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event.world_id(), a);
    }
}
