//! Per-world write serialization
//!
//! Worlds are independent units of concurrency: writes to one world run one at
//! a time, writes to different worlds never wait on each other.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::value_objects::WorldId;

#[derive(Clone, Default)]
pub struct WorldLocks {
    locks: Arc<DashMap<WorldId, Arc<Mutex<()>>>>,
}

impl WorldLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, world_id: WorldId) -> Arc<Mutex<()>> {
        self.locks.entry(world_id).or_default().clone()
    }

    /// Run `work` on its own task while holding the world's lock.
    ///
    /// The work is detached from the caller: if the caller's future is dropped
    /// mid-way (request cancelled), the task still runs to completion, so a
    /// committed ledger change always gets its event published.
    pub async fn run_detached<T, F>(&self, world_id: WorldId, work: F) -> Result<T, tokio::task::JoinError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let lock = self.lock_for(world_id);
        tokio::spawn(async move {
            let _guard = lock.lock().await;
            work.await
        })
        .await
    }
}
