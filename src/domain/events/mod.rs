//! Domain events - Notifications of storage state changes

pub mod domain_events;

pub use domain_events::{
    AllocationIncreasedEvent, EntityStoredEvent, EventMetadata, StorageEvent,
    StorageInitializedEvent,
};
