//! Application services - Use case implementations
//!
//! Services accept port dependencies and return domain aggregates. HTTP
//! routes and background workers only ever talk to these traits.

pub mod storage_event_publisher;
pub mod storage_projection_service;
pub mod storage_service;
pub mod world_locks;

pub use storage_event_publisher::StorageEventPublisher;
pub use storage_projection_service::{
    StorageAudit, StorageProjectionService, StorageProjectionServiceImpl,
};
pub use storage_service::{StorageError, StorageService, StorageServiceImpl, StoreOutcome};
pub use world_locks::WorldLocks;
