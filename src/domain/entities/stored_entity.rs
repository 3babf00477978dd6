//! Stored entity - Any game content whose size counts against a world's quota
//!
//! The owning bounded context (characters, comments, talents, ...) keeps the
//! entity itself. Storage only sees the world it belongs to, its key and its
//! current size in bytes.

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{EntityId, EntityType, WorldId};

/// Identifies one stored entity within a world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl StorageKey {
    pub fn new(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Capability of a storage-accounted entity
pub trait StoredEntity: Send + Sync {
    fn world_id(&self) -> WorldId;
    fn entity_type(&self) -> EntityType;
    fn entity_id(&self) -> EntityId;
    /// Current size in bytes, recomputed whenever content-bearing fields change
    fn size(&self) -> i64;

    fn key(&self) -> StorageKey {
        StorageKey::new(self.entity_type(), self.entity_id())
    }
}

/// Plain description of a stored entity, as handed over by a command handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntitySnapshot {
    pub world_id: WorldId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub size: i64,
}

impl StoredEntitySnapshot {
    pub fn new(world_id: WorldId, entity_type: EntityType, entity_id: EntityId, size: i64) -> Self {
        Self {
            world_id,
            entity_type,
            entity_id,
            size,
        }
    }

    /// Snapshot any stored entity
    pub fn of<E: StoredEntity + ?Sized>(entity: &E) -> Self {
        Self::new(
            entity.world_id(),
            entity.entity_type(),
            entity.entity_id(),
            entity.size(),
        )
    }

    /// Same entity with a different size
    pub fn with_size(&self, size: i64) -> Self {
        Self { size, ..self.clone() }
    }
}

impl StoredEntity for StoredEntitySnapshot {
    fn world_id(&self) -> WorldId {
        self.world_id
    }

    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    fn size(&self) -> i64 {
        self.size
    }
}

/// Size of textual content, counted in UTF-8 bytes
pub fn content_size(text: &str) -> i64 {
    text.len() as i64
}

/// Size of structured content, counted as its compact JSON serialization
pub fn json_size<T: Serialize + ?Sized>(value: &T) -> Result<i64, serde_json::Error> {
    serde_json::to_vec(value).map(|bytes| bytes.len() as i64)
}
