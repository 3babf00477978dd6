//! Storage Event Publisher - Appends storage events to the log and fans them out
//!
//! The log append is the durable publication; it is retried on failure because
//! a committed ledger change without its event would let the ledger and the
//! log diverge. The bus notification that follows is best-effort.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::application::ports::outbound::{
    EventBusPort, EventStoreError, RecordedEvent, StorageEventRepositoryPort,
};
use crate::domain::events::StorageEvent;

/// Publisher writing storage events to the ordered event stream
pub struct StorageEventPublisher {
    repository: Arc<dyn StorageEventRepositoryPort>,
    event_bus: Arc<dyn EventBusPort<StorageEvent>>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl StorageEventPublisher {
    /// Create a new publisher
    pub fn new(
        repository: Arc<dyn StorageEventRepositoryPort>,
        event_bus: Arc<dyn EventBusPort<StorageEvent>>,
    ) -> Self {
        Self {
            repository,
            event_bus,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }

    /// Number of append attempts (at least one) and the linear backoff step
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// Append the event to the log, then notify bus subscribers
    pub async fn publish(&self, event: StorageEvent) -> Result<RecordedEvent, EventStoreError> {
        let sequence = self.append_with_retry(&event).await?;
        debug!(
            sequence,
            world_id = %event.world_id(),
            event_type = event.event_type(),
            "Appended storage event"
        );

        self.event_bus.publish(event.clone()).await;

        Ok(RecordedEvent { sequence, event })
    }

    async fn append_with_retry(&self, event: &StorageEvent) -> Result<i64, EventStoreError> {
        let mut attempt = 1;
        loop {
            match self.repository.append(event).await {
                Ok(sequence) => return Ok(sequence),
                Err(e) if attempt < self.retry_attempts => {
                    warn!(
                        attempt,
                        world_id = %event.world_id(),
                        "Storage event append failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
