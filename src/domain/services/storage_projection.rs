//! Storage projection - Folds a world's event history into usage figures
//!
//! Two independent readings are produced from the same history:
//! - `replayed_used_bytes`: the `used_bytes_after` of the last stored event,
//!   i.e. what the ledger recorded at its latest commit.
//! - `recomputed_used_bytes`: the sum of the latest size per entity key,
//!   which survives gaps in the log because every event carries the full size.
//!
//! The projection never executes business rules; it only reads facts.

use std::collections::BTreeMap;

use crate::domain::entities::StorageKey;
use crate::domain::events::{EntityStoredEvent, StorageEvent};
use crate::domain::value_objects::WorldId;

/// Usage state of one world, rebuilt purely from its events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageProjection {
    world_id: WorldId,
    allocated_bytes: Option<i64>,
    replayed_used_bytes: i64,
    entity_sizes: BTreeMap<StorageKey, i64>,
    events_applied: usize,
}

impl StorageProjection {
    pub fn new(world_id: WorldId) -> Self {
        Self {
            world_id,
            allocated_bytes: None,
            replayed_used_bytes: 0,
            entity_sizes: BTreeMap::new(),
            events_applied: 0,
        }
    }

    /// Build a projection from an ordered history. Events of other worlds are skipped.
    pub fn from_events<'a, I>(world_id: WorldId, events: I) -> Self
    where
        I: IntoIterator<Item = &'a StorageEvent>,
    {
        let mut projection = Self::new(world_id);
        for event in events {
            projection.apply(event);
        }
        projection
    }

    /// Fold one event into the projection
    pub fn apply(&mut self, event: &StorageEvent) {
        if event.world_id() != self.world_id {
            return;
        }

        match event {
            StorageEvent::StorageInitialized(e) => {
                self.allocated_bytes = Some(e.allocated_bytes);
            }
            StorageEvent::AllocationIncreased(e) => {
                self.allocated_bytes = Some(e.allocated_bytes);
            }
            StorageEvent::EntityStored(e) => self.apply_stored(e),
        }
        self.events_applied += 1;
    }

    fn apply_stored(&mut self, event: &EntityStoredEvent) {
        self.replayed_used_bytes = event.used_bytes_after;
        if event.size == 0 {
            self.entity_sizes.remove(&event.key());
        } else {
            self.entity_sizes.insert(event.key(), event.size);
        }
    }

    /// Latest granted allocation, if the history contains one
    pub fn allocated_bytes(&self) -> Option<i64> {
        self.allocated_bytes
    }

    pub fn replayed_used_bytes(&self) -> i64 {
        self.replayed_used_bytes
    }

    pub fn recomputed_used_bytes(&self) -> i64 {
        self.entity_sizes.values().sum()
    }

    pub fn stored_entity_count(&self) -> usize {
        self.entity_sizes.len()
    }

    pub fn events_applied(&self) -> usize {
        self.events_applied
    }
}

/// Usage as recorded by the last stored event, 0 for an empty history
pub fn replay_used_bytes<'a, I>(events: I) -> i64
where
    I: IntoIterator<Item = &'a EntityStoredEvent>,
{
    events
        .into_iter()
        .last()
        .map(|e| e.used_bytes_after)
        .unwrap_or(0)
}

/// Usage as the sum of the latest size per entity key
pub fn recompute_used_bytes<'a, I>(events: I) -> i64
where
    I: IntoIterator<Item = &'a EntityStoredEvent>,
{
    let mut sizes: BTreeMap<StorageKey, i64> = BTreeMap::new();
    for event in events {
        sizes.insert(event.key(), event.size);
    }
    sizes.values().sum()
}
