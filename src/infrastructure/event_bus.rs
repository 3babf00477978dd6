//! In-Process Event Bus - Fan storage events out to in-process subscribers
//!
//! Backed by a tokio broadcast channel. Subscribers that fall behind lose the
//! oldest events; the event log is the record they can catch up from.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::outbound::EventBusPort;
use crate::domain::events::StorageEvent;

#[derive(Clone)]
pub struct InProcessEventBus {
    sender: broadcast::Sender<StorageEvent>,
}

impl InProcessEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventBusPort<StorageEvent> for InProcessEventBus {
    async fn publish(&self, event: StorageEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("No subscribers for storage event");
        }
    }
}
