//! Quota Ledger - Per-world allocated/used byte counters
//!
//! The ledger is the only place a world's usage changes. Every change is a
//! signed delta checked against the allocation before it is committed, so
//! `0 <= used_bytes <= allocated_bytes` holds after every successful call and
//! a rejected call leaves the ledger untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::EntityStoredEvent;
use crate::domain::services::replay_used_bytes;
use crate::domain::value_objects::WorldId;

/// Rule violations raised by the ledger
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// The change would push usage above the allocation
    #[error(
        "Storage quota exceeded for world {world_id}: {used_bytes} used + {delta} requested > {allocated_bytes} allocated"
    )]
    QuotaExceeded {
        world_id: WorldId,
        allocated_bytes: i64,
        used_bytes: i64,
        delta: i64,
    },

    /// The change would push usage below zero. Always a caller bug.
    #[error("Negative resulting usage for world {world_id}: {used_bytes} used + {delta}")]
    NegativeResultingUsage {
        world_id: WorldId,
        used_bytes: i64,
        delta: i64,
    },

    #[error("Invalid allocation of {requested} bytes for world {world_id}: {reason}")]
    InvalidAllocation {
        world_id: WorldId,
        requested: i64,
        reason: &'static str,
    },
}

/// One world's storage ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub world_id: WorldId,
    pub allocated_bytes: i64,
    pub used_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaLedger {
    /// Open a ledger with no usage
    pub fn new(world_id: WorldId, allocated_bytes: i64) -> Result<Self, QuotaError> {
        if allocated_bytes < 0 {
            return Err(QuotaError::InvalidAllocation {
                world_id,
                requested: allocated_bytes,
                reason: "allocation cannot be negative",
            });
        }

        let now = Utc::now();
        Ok(Self {
            world_id,
            allocated_bytes,
            used_bytes: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn remaining_bytes(&self) -> i64 {
        self.allocated_bytes - self.used_bytes
    }

    /// Usage the ledger would hold after `delta`, without committing it
    pub fn candidate(&self, delta: i64) -> Result<i64, QuotaError> {
        let exceeded = || QuotaError::QuotaExceeded {
            world_id: self.world_id,
            allocated_bytes: self.allocated_bytes,
            used_bytes: self.used_bytes,
            delta,
        };

        let candidate = self.used_bytes.checked_add(delta).ok_or_else(exceeded)?;
        if candidate > self.allocated_bytes {
            return Err(exceeded());
        }
        if candidate < 0 {
            return Err(QuotaError::NegativeResultingUsage {
                world_id: self.world_id,
                used_bytes: self.used_bytes,
                delta,
            });
        }
        Ok(candidate)
    }

    /// Apply a signed delta and return the new usage
    pub fn apply(&mut self, delta: i64) -> Result<i64, QuotaError> {
        let candidate = self.candidate(delta)?;
        self.used_bytes = candidate;
        self.updated_at = Utc::now();
        Ok(candidate)
    }

    /// Raise the allocation. Lowering it is not supported.
    pub fn increase_allocation(&mut self, allocated_bytes: i64) -> Result<(), QuotaError> {
        if allocated_bytes < self.allocated_bytes {
            return Err(QuotaError::InvalidAllocation {
                world_id: self.world_id,
                requested: allocated_bytes,
                reason: "allocation can only be increased",
            });
        }
        self.allocated_bytes = allocated_bytes;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Put the allocation back to an earlier value. Unlike an increase this may
    /// lower it, but never below current usage.
    pub fn revert_allocation(&mut self, allocated_bytes: i64) -> Result<(), QuotaError> {
        if allocated_bytes < self.used_bytes {
            return Err(QuotaError::InvalidAllocation {
                world_id: self.world_id,
                requested: allocated_bytes,
                reason: "allocation cannot drop below current usage",
            });
        }
        self.allocated_bytes = allocated_bytes;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reset usage from an ordered event history and return it.
    ///
    /// Events for other worlds are ignored. Replaying the same history twice
    /// yields the same ledger.
    pub fn rebuild<'a, I>(&mut self, events: I) -> i64
    where
        I: IntoIterator<Item = &'a EntityStoredEvent>,
    {
        let world_id = self.world_id;
        self.used_bytes = replay_used_bytes(events.into_iter().filter(|e| e.world_id == world_id));
        self.updated_at = Utc::now();
        self.used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventMetadata;
    use crate::domain::value_objects::{EntityId, EntityType};

    fn ledger(allocated: i64) -> QuotaLedger {
        QuotaLedger::new(WorldId::new(), allocated).unwrap()
    }

    #[test]
    fn test_new_ledger_is_empty() {
        let ledger = ledger(1000);
        assert_eq!(ledger.used_bytes, 0);
        assert_eq!(ledger.remaining_bytes(), 1000);
    }

    #[test]
    fn test_negative_allocation_is_rejected() {
        let err = QuotaLedger::new(WorldId::new(), -1).unwrap_err();
        assert!(matches!(err, QuotaError::InvalidAllocation { requested: -1, .. }));
    }

    #[test]
    fn test_apply_grows_and_shrinks() {
        let mut ledger = ledger(1000);
        assert_eq!(ledger.apply(400), Ok(400));
        assert_eq!(ledger.apply(300), Ok(700));
        assert_eq!(ledger.apply(-700), Ok(0));
    }

    #[test]
    fn test_quota_is_inclusive() {
        let mut ledger = ledger(1000);
        assert_eq!(ledger.apply(1000), Ok(1000));
        assert_eq!(ledger.remaining_bytes(), 0);
    }

    #[test]
    fn test_exceeding_quota_leaves_usage_unchanged() {
        let mut ledger = ledger(1000);
        ledger.apply(700).unwrap();

        let err = ledger.apply(400).unwrap_err();

        assert!(matches!(
            err,
            QuotaError::QuotaExceeded {
                allocated_bytes: 1000,
                used_bytes: 700,
                delta: 400,
                ..
            }
        ));
        assert_eq!(ledger.used_bytes, 700);
    }

    #[test]
    fn test_negative_usage_is_rejected() {
        let mut ledger = ledger(1000);
        ledger.apply(100).unwrap();

        let err = ledger.apply(-101).unwrap_err();

        assert!(matches!(err, QuotaError::NegativeResultingUsage { .. }));
        assert_eq!(ledger.used_bytes, 100);
    }

    #[test]
    fn test_overflow_counts_as_quota_exceeded() {
        let mut ledger = ledger(i64::MAX);
        ledger.apply(10).unwrap();

        let err = ledger.apply(i64::MAX).unwrap_err();

        assert!(matches!(err, QuotaError::QuotaExceeded { .. }));
        assert_eq!(ledger.used_bytes, 10);
    }

    #[test]
    fn test_apply_stays_within_bounds_for_any_delta() {
        let mut ledger = ledger(500);
        for delta in [250, -300, 251, 250, 1, -501, -250, 0, 500, -1] {
            let _ = ledger.apply(delta);
            assert!(ledger.used_bytes >= 0);
            assert!(ledger.used_bytes <= ledger.allocated_bytes);
        }
    }

    #[test]
    fn test_increase_allocation() {
        let mut ledger = ledger(1000);
        ledger.apply(900).unwrap();

        ledger.increase_allocation(2000).unwrap();
        assert_eq!(ledger.apply(1100), Ok(2000));

        let err = ledger.increase_allocation(1500).unwrap_err();
        assert!(matches!(err, QuotaError::InvalidAllocation { .. }));
        assert_eq!(ledger.allocated_bytes, 2000);
    }

    #[test]
    fn test_revert_allocation_never_drops_below_usage() {
        let mut ledger = ledger(100);
        ledger.increase_allocation(500).unwrap();
        ledger.apply(80).unwrap();

        ledger.revert_allocation(100).unwrap();
        assert_eq!(ledger.allocated_bytes, 100);

        let err = ledger.revert_allocation(50).unwrap_err();
        assert!(matches!(err, QuotaError::InvalidAllocation { requested: 50, .. }));
        assert_eq!(ledger.allocated_bytes, 100);
    }

    #[test]
    fn test_rebuild_takes_last_recorded_usage() {
        let mut ledger = ledger(1000);
        let world_id = ledger.world_id;
        let entity_id = EntityId::new();
        let event = |size, after| EntityStoredEvent {
            metadata: EventMetadata::default(),
            world_id,
            entity_type: EntityType::Item,
            entity_id,
            size,
            used_bytes_after: after,
        };
        let events = vec![event(400, 400), event(700, 700)];

        assert_eq!(ledger.rebuild(&events), 700);
        assert_eq!(ledger.rebuild(&events), 700);
        assert_eq!(ledger.rebuild(std::iter::empty()), 0);
    }
}
