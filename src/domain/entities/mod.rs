//! Domain entities - Objects tracked by storage accounting

mod stored_entity;

pub use stored_entity::{
    content_size, json_size, StorageKey, StoredEntity, StoredEntitySnapshot,
};
