use serde::{Deserialize, Serialize};

use crate::application::ports::outbound::RecordedEvent;
use crate::application::services::{StorageAudit, StoreOutcome};
use crate::domain::aggregates::QuotaLedger;
use crate::domain::entities::{content_size, json_size, StoredEntitySnapshot};
use crate::domain::events::StorageEvent;
use crate::domain::value_objects::{EntityId, EntityType, WorldId};

// ============================================================================
// Request DTOs
// ============================================================================

/// Request to grant a world its quota
#[derive(Debug, Default, Deserialize)]
pub struct InitializeStorageRequestDto {
    /// Falls back to the configured default when omitted
    #[serde(default)]
    pub allocated_bytes: Option<i64>,
}

/// Request to raise a world's quota
#[derive(Debug, Deserialize)]
pub struct IncreaseAllocationRequestDto {
    pub allocated_bytes: i64,
}

/// An entity's current size, as reported by a command handler.
///
/// Handlers either send the size they computed or the content itself: a JSON
/// string is sized as UTF-8 text, anything else as compact JSON.
#[derive(Debug, Deserialize)]
pub struct StoreEntityRequestDto {
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    /// Size before the change; 0 for a new entity
    #[serde(default)]
    pub previous_size: i64,
}

impl StoreEntityRequestDto {
    /// Explicit size if present, otherwise the size of `content`
    pub fn measured_size(&self) -> Result<i64, String> {
        match (self.size, &self.content) {
            (Some(size), _) => Ok(size),
            (None, Some(serde_json::Value::String(text))) => Ok(content_size(text)),
            (None, Some(value)) => json_size(value).map_err(|e| e.to_string()),
            (None, None) => Err("either size or content is required".to_string()),
        }
    }

    pub fn into_snapshot(self, world_id: WorldId) -> Result<StoredEntitySnapshot, String> {
        let entity_id = EntityId::parse(&self.entity_id).map_err(|e| e.to_string())?;
        let size = self.measured_size()?;
        Ok(StoredEntitySnapshot::new(
            world_id,
            self.entity_type,
            entity_id,
            size,
        ))
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerResponseDto {
    pub world_id: String,
    pub allocated_bytes: i64,
    pub used_bytes: i64,
    pub remaining_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<QuotaLedger> for LedgerResponseDto {
    fn from(ledger: QuotaLedger) -> Self {
        Self {
            world_id: ledger.world_id.to_string(),
            allocated_bytes: ledger.allocated_bytes,
            used_bytes: ledger.used_bytes,
            remaining_bytes: ledger.remaining_bytes(),
            created_at: ledger.created_at.to_rfc3339(),
            updated_at: ledger.updated_at.to_rfc3339(),
        }
    }
}

/// Result of a store, restore or discard call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponseDto {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub size: i64,
    /// False when the size did not change and nothing was recorded
    pub changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_bytes_after: Option<i64>,
}

impl From<StoreOutcome> for StoreResponseDto {
    fn from(outcome: StoreOutcome) -> Self {
        match outcome {
            StoreOutcome::Stored(event) => Self {
                entity_type: event.entity_type,
                entity_id: event.entity_id.to_string(),
                size: event.size,
                changed: true,
                used_bytes_after: Some(event.used_bytes_after),
            },
            StoreOutcome::Unchanged { key, size } => Self {
                entity_type: key.entity_type,
                entity_id: key.entity_id.to_string(),
                size,
                changed: false,
                used_bytes_after: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEventDto {
    pub sequence: i64,
    pub event_type: String,
    pub occurred_at: String,
    pub event: StorageEvent,
}

impl From<RecordedEvent> for RecordedEventDto {
    fn from(recorded: RecordedEvent) -> Self {
        Self {
            sequence: recorded.sequence,
            event_type: recorded.event.event_type().to_string(),
            occurred_at: recorded.event.metadata().timestamp.to_rfc3339(),
            event: recorded.event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageAuditDto {
    pub world_id: String,
    pub allocated_bytes: i64,
    pub logged_allocated_bytes: Option<i64>,
    pub ledger_used_bytes: i64,
    pub replayed_used_bytes: i64,
    pub recomputed_used_bytes: i64,
    pub stored_entities: usize,
    pub events_applied: usize,
    pub consistent: bool,
}

impl From<StorageAudit> for StorageAuditDto {
    fn from(audit: StorageAudit) -> Self {
        Self {
            world_id: audit.world_id.to_string(),
            allocated_bytes: audit.allocated_bytes,
            logged_allocated_bytes: audit.logged_allocated_bytes,
            ledger_used_bytes: audit.ledger_used_bytes,
            replayed_used_bytes: audit.replayed_used_bytes,
            recomputed_used_bytes: audit.recomputed_used_bytes,
            stored_entities: audit.stored_entities,
            events_applied: audit.events_applied,
            consistent: audit.consistent,
        }
    }
}
