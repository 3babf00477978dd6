//! In-memory quota ledger for development and testing
//!
//! Each world's entry lives in its own `DashMap` shard slot; the check and the
//! write of `apply` happen under that entry's guard, so they are atomic per
//! world. Nothing is persisted.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::application::ports::outbound::{LedgerError, QuotaLedgerPort};
use crate::domain::aggregates::QuotaLedger;
use crate::domain::events::EntityStoredEvent;
use crate::domain::value_objects::WorldId;

#[derive(Default)]
pub struct InMemoryQuotaLedger {
    ledgers: DashMap<WorldId, QuotaLedger>,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaLedgerPort for InMemoryQuotaLedger {
    async fn initialize(
        &self,
        owner_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError> {
        match self.ledgers.entry(owner_id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyInitialized(owner_id)),
            Entry::Vacant(slot) => {
                let ledger = QuotaLedger::new(owner_id, allocated_bytes)?;
                slot.insert(ledger.clone());
                Ok(ledger)
            }
        }
    }

    async fn apply(&self, world_id: WorldId, delta: i64) -> Result<i64, LedgerError> {
        let mut ledger = self
            .ledgers
            .get_mut(&world_id)
            .ok_or(LedgerError::NotInitialized(world_id))?;
        Ok(ledger.apply(delta)?)
    }

    async fn rebuild(
        &self,
        world_id: WorldId,
        events: &[EntityStoredEvent],
    ) -> Result<QuotaLedger, LedgerError> {
        let mut ledger = self
            .ledgers
            .get_mut(&world_id)
            .ok_or(LedgerError::NotInitialized(world_id))?;
        ledger.rebuild(events);
        Ok(ledger.clone())
    }

    async fn increase_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError> {
        let mut ledger = self
            .ledgers
            .get_mut(&world_id)
            .ok_or(LedgerError::NotInitialized(world_id))?;
        ledger.increase_allocation(allocated_bytes)?;
        Ok(ledger.clone())
    }

    async fn remove(&self, world_id: WorldId) -> Result<(), LedgerError> {
        self.ledgers
            .remove(&world_id)
            .map(|_| ())
            .ok_or(LedgerError::NotInitialized(world_id))
    }

    async fn revert_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError> {
        let mut ledger = self
            .ledgers
            .get_mut(&world_id)
            .ok_or(LedgerError::NotInitialized(world_id))?;
        ledger.revert_allocation(allocated_bytes)?;
        Ok(ledger.clone())
    }

    async fn get(&self, world_id: WorldId) -> Result<Option<QuotaLedger>, LedgerError> {
        Ok(self.ledgers.get(&world_id).map(|l| l.clone()))
    }

    async fn list(&self) -> Result<Vec<QuotaLedger>, LedgerError> {
        let mut ledgers: Vec<QuotaLedger> = self.ledgers.iter().map(|l| l.clone()).collect();
        ledgers.sort_by_key(|l| (l.created_at, l.world_id));
        Ok(ledgers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::QuotaError;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let ledger = InMemoryQuotaLedger::new();
        let world_id = WorldId::new();

        ledger.initialize(world_id, 100).await.unwrap();
        let err = ledger.initialize(world_id, 100).await.unwrap_err();

        assert_eq!(err, LedgerError::AlreadyInitialized(world_id));
    }

    #[tokio::test]
    async fn test_rejected_apply_leaves_usage_unchanged() {
        let ledger = InMemoryQuotaLedger::new();
        let world_id = WorldId::new();
        ledger.initialize(world_id, 100).await.unwrap();
        ledger.apply(world_id, 60).await.unwrap();

        let err = ledger.apply(world_id, 41).await.unwrap_err();
        assert!(matches!(err, LedgerError::Quota(QuotaError::QuotaExceeded { .. })));
        let err = ledger.apply(world_id, -61).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Quota(QuotaError::NegativeResultingUsage { .. })
        ));

        assert_eq!(ledger.get(world_id).await.unwrap().unwrap().used_bytes, 60);
        // Filling to the brim is allowed
        assert_eq!(ledger.apply(world_id, 40).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_apply_on_unknown_world_fails() {
        let ledger = InMemoryQuotaLedger::new();
        let world_id = WorldId::new();
        assert_eq!(
            ledger.apply(world_id, 1).await.unwrap_err(),
            LedgerError::NotInitialized(world_id)
        );
    }

    #[tokio::test]
    async fn test_remove_and_revert_allocation() {
        let ledger = InMemoryQuotaLedger::new();
        let world_id = WorldId::new();
        ledger.initialize(world_id, 100).await.unwrap();
        ledger.increase_allocation(world_id, 400).await.unwrap();

        let reverted = ledger.revert_allocation(world_id, 100).await.unwrap();
        assert_eq!(reverted.allocated_bytes, 100);

        ledger.remove(world_id).await.unwrap();
        assert!(ledger.get(world_id).await.unwrap().is_none());
        assert_eq!(
            ledger.remove(world_id).await.unwrap_err(),
            LedgerError::NotInitialized(world_id)
        );
        // The world can be initialized again
        ledger.initialize(world_id, 10).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_never_overshoot() {
        let ledger = Arc::new(InMemoryQuotaLedger::new());
        let world_id = WorldId::new();
        ledger.initialize(world_id, 1000).await.unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.apply(world_id, 30).await })
            })
            .collect();
        let accepted = futures_util::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count() as i64;

        let used = ledger.get(world_id).await.unwrap().unwrap().used_bytes;
        assert_eq!(accepted, 33);
        assert_eq!(used, accepted * 30);
    }

    #[tokio::test]
    async fn test_list_returns_every_world() {
        let ledger = InMemoryQuotaLedger::new();
        for _ in 0..3 {
            ledger.initialize(WorldId::new(), 10).await.unwrap();
        }
        assert_eq!(ledger.list().await.unwrap().len(), 3);
    }
}
