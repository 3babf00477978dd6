//! Storage events - Append-only facts about a world's storage usage
//!
//! Storage events are the audit trail of every quota grant and every size
//! change applied to a world's ledger. They are also the replay source the
//! projection uses to rebuild `used_bytes` after a failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::StorageKey;
use crate::domain::value_objects::{EntityId, EntityType, WorldId};

/// Base data for all events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Optional correlation ID for tracing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }
}

/// A quota was granted to a new owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInitializedEvent {
    pub metadata: EventMetadata,
    /// The ledger owner. Ledgers are kept per world, so this is the world ID.
    pub owner_id: WorldId,
    pub allocated_bytes: i64,
}

/// An entity's size was applied to its world's ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStoredEvent {
    pub metadata: EventMetadata,
    pub world_id: WorldId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    /// Size of the entity after the change; 0 once discarded
    pub size: i64,
    /// Ledger usage right after this change was committed
    pub used_bytes_after: i64,
}

impl EntityStoredEvent {
    pub fn key(&self) -> StorageKey {
        StorageKey::new(self.entity_type, self.entity_id)
    }
}

/// An administrator raised a world's quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationIncreasedEvent {
    pub metadata: EventMetadata,
    pub world_id: WorldId,
    pub allocated_bytes: i64,
}

/// All storage events in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageEvent {
    StorageInitialized(StorageInitializedEvent),
    EntityStored(EntityStoredEvent),
    AllocationIncreased(AllocationIncreasedEvent),
}

impl StorageEvent {
    /// Get the metadata for this event
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            StorageEvent::StorageInitialized(e) => &e.metadata,
            StorageEvent::EntityStored(e) => &e.metadata,
            StorageEvent::AllocationIncreased(e) => &e.metadata,
        }
    }

    /// The world whose event stream this event belongs to
    pub fn world_id(&self) -> WorldId {
        match self {
            StorageEvent::StorageInitialized(e) => e.owner_id,
            StorageEvent::EntityStored(e) => e.world_id,
            StorageEvent::AllocationIncreased(e) => e.world_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            StorageEvent::StorageInitialized(_) => "StorageInitialized",
            StorageEvent::EntityStored(_) => "EntityStored",
            StorageEvent::AllocationIncreased(_) => "AllocationIncreased",
        }
    }
}

impl From<StorageInitializedEvent> for StorageEvent {
    fn from(event: StorageInitializedEvent) -> Self {
        StorageEvent::StorageInitialized(event)
    }
}

impl From<EntityStoredEvent> for StorageEvent {
    fn from(event: EntityStoredEvent) -> Self {
        StorageEvent::EntityStored(event)
    }
}

impl From<AllocationIncreasedEvent> for StorageEvent {
    fn from(event: AllocationIncreasedEvent) -> Self {
        StorageEvent::AllocationIncreased(event)
    }
}
