//! Event Bus Port - Interface for publishing storage events to subscribers
//!
//! This port abstracts the event bus, allowing the application to notify
//! subscribers without knowing the underlying transport.

use async_trait::async_trait;

/// Port for publishing events to in-process subscribers
#[async_trait]
pub trait EventBusPort<E: Send + Sync + 'static>: Send + Sync {
    /// Publish an event to the bus
    ///
    /// Best-effort: the event log is the durable record, so delivery problems
    /// are logged by the implementation and never fail the write.
    async fn publish(&self, event: E);
}
