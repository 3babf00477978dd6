//! Background workers for storage events and ledger audits

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::application::services::{StorageAudit, StorageProjectionService};
use crate::domain::events::StorageEvent;

/// Worker that records every published storage event in the log output
pub async fn event_log_worker(mut receiver: broadcast::Receiver<StorageEvent>) {
    tracing::info!("Starting storage event log worker");
    loop {
        match receiver.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Storage event log worker fell behind, events skipped");
            }
            Err(RecvError::Closed) => {
                tracing::info!("Storage event bus closed, stopping event log worker");
                break;
            }
        }
    }
}

fn log_event(event: &StorageEvent) {
    match event {
        StorageEvent::StorageInitialized(e) => tracing::info!(
            world_id = %e.owner_id,
            allocated_bytes = e.allocated_bytes,
            "Storage initialized"
        ),
        StorageEvent::EntityStored(e) => tracing::info!(
            world_id = %e.world_id,
            key = %e.key(),
            size = e.size,
            used_bytes_after = e.used_bytes_after,
            "Entity stored"
        ),
        StorageEvent::AllocationIncreased(e) => tracing::info!(
            world_id = %e.world_id,
            allocated_bytes = e.allocated_bytes,
            "Storage allocation increased"
        ),
    }
}

/// Worker that periodically compares every ledger with its event history.
///
/// Drift is only reported; repairing it is an explicit rebuild.
pub async fn audit_worker<S>(projection_service: Arc<S>, interval: Duration)
where
    S: StorageProjectionService + ?Sized,
{
    tracing::info!("Starting storage audit worker");
    loop {
        tokio::time::sleep(interval).await;
        let drifted = run_audit(projection_service.as_ref()).await;
        if drifted > 0 {
            tracing::warn!(drifted, "Storage audit found inconsistent ledgers");
        }
    }
}

/// Audit all worlds once and return how many ledgers drifted
pub async fn run_audit<S>(projection_service: &S) -> usize
where
    S: StorageProjectionService + ?Sized,
{
    let audits = match projection_service.audit_all().await {
        Ok(audits) => audits,
        Err(e) => {
            tracing::error!("Storage audit failed: {}", e);
            return 0;
        }
    };

    let drifted: Vec<&StorageAudit> = audits.iter().filter(|a| !a.consistent).collect();
    for audit in &drifted {
        tracing::warn!(
            world_id = %audit.world_id,
            allocated_bytes = audit.allocated_bytes,
            logged_allocated_bytes = ?audit.logged_allocated_bytes,
            ledger_used_bytes = audit.ledger_used_bytes,
            replayed_used_bytes = audit.replayed_used_bytes,
            recomputed_used_bytes = audit.recomputed_used_bytes,
            "Storage ledger drifted from its event history"
        );
    }
    tracing::debug!(worlds = audits.len(), drifted = drifted.len(), "Storage audit complete");
    drifted.len()
}
