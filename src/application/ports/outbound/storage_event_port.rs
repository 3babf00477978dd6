//! Storage event repository port - The append-only event log

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::events::{EntityStoredEvent, StorageEvent};
use crate::domain::value_objects::WorldId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EventStoreError {
    #[error("Event store error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// An event together with its position in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Log position, strictly increasing in append order
    pub sequence: i64,
    pub event: StorageEvent,
}

impl RecordedEvent {
    pub fn as_entity_stored(&self) -> Option<&EntityStoredEvent> {
        match &self.event {
            StorageEvent::EntityStored(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageEventRepositoryPort: Send + Sync {
    /// Append an event and return its sequence number
    async fn append(&self, event: &StorageEvent) -> Result<i64, EventStoreError>;

    /// All events of one world, in append order
    async fn list_for_world(&self, world_id: WorldId) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Events after `last_sequence` across all worlds, in append order
    async fn fetch_since(
        &self,
        last_sequence: i64,
        limit: u32,
    ) -> Result<Vec<RecordedEvent>, EventStoreError>;
}
