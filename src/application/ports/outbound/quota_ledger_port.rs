//! Quota ledger port - Persistence of per-world storage ledgers
//!
//! Implementations must make `apply` atomic per world: two concurrent calls
//! against the same world may never both pass the allocation check against
//! the same stale usage.

use async_trait::async_trait;

use crate::domain::aggregates::{QuotaError, QuotaLedger};
use crate::domain::events::EntityStoredEvent;
use crate::domain::value_objects::WorldId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage already initialized for owner {0}")]
    AlreadyInitialized(WorldId),

    #[error("Storage not initialized for world {0}")]
    NotInitialized(WorldId),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    /// Database operation failed - includes operation name for tracing.
    #[error("Database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },
}

impl LedgerError {
    pub fn database(operation: &'static str, message: impl ToString) -> Self {
        Self::Database {
            operation,
            message: message.to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaLedgerPort: Send + Sync {
    /// Grant a quota to a new owner, starting at zero usage
    async fn initialize(
        &self,
        owner_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError>;

    /// Atomically apply a signed delta and return the committed usage
    async fn apply(&self, world_id: WorldId, delta: i64) -> Result<i64, LedgerError>;

    /// Reset usage from the world's ordered stored-event history
    async fn rebuild(
        &self,
        world_id: WorldId,
        events: &[EntityStoredEvent],
    ) -> Result<QuotaLedger, LedgerError>;

    /// Raise a world's allocation
    async fn increase_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError>;

    /// Drop a world's ledger. Only used to undo an initialization whose event
    /// could not be recorded.
    async fn remove(&self, world_id: WorldId) -> Result<(), LedgerError>;

    /// Set the allocation back to an earlier value. Only used to undo an
    /// increase whose event could not be recorded.
    async fn revert_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError>;

    async fn get(&self, world_id: WorldId) -> Result<Option<QuotaLedger>, LedgerError>;

    async fn list(&self) -> Result<Vec<QuotaLedger>, LedgerError>;
}
