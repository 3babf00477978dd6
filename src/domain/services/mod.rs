//! Domain services - Pure operations over domain types

pub mod storage_projection;

pub use storage_projection::{recompute_used_bytes, replay_used_bytes, StorageProjection};
