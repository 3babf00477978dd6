//! Domain layer - Storage accounting rules with no external dependencies
//!
//! This layer contains:
//! - Entities: the stored entity contract and its snapshot
//! - Value Objects: typed IDs and entity types
//! - Aggregates: the per-world quota ledger
//! - Domain Events: storage grants and size changes
//! - Domain Services: the event projection

pub mod aggregates;
pub mod entities;
pub mod events;
pub mod services;
pub mod value_objects;
