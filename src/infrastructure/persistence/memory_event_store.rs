//! In-memory storage event log for development and testing

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::ports::outbound::{
    EventStoreError, RecordedEvent, StorageEventRepositoryPort,
};
use crate::domain::events::StorageEvent;
use crate::domain::value_objects::WorldId;

/// Append-only event log kept in a Vec; sequence numbers start at 1
#[derive(Clone, Default)]
pub struct InMemoryStorageEventRepository {
    events: Arc<RwLock<Vec<RecordedEvent>>>,
}

impl InMemoryStorageEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl StorageEventRepositoryPort for InMemoryStorageEventRepository {
    async fn append(&self, event: &StorageEvent) -> Result<i64, EventStoreError> {
        let mut events = self.events.write().await;
        let sequence = events.len() as i64 + 1;
        events.push(RecordedEvent {
            sequence,
            event: event.clone(),
        });
        Ok(sequence)
    }

    async fn list_for_world(&self, world_id: WorldId) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|r| r.event.world_id() == world_id)
            .cloned()
            .collect())
    }

    async fn fetch_since(
        &self,
        last_sequence: i64,
        limit: u32,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let events = self.events.read().await;
        // Sequence n sits at index n - 1
        let start = last_sequence.clamp(0, events.len() as i64) as usize;
        Ok(events
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
