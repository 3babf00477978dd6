//! SQLite quota ledger
//!
//! `apply` is a single conditional UPDATE: the bounds check and the write are
//! one statement, so SQLite's write lock makes it atomic even across
//! processes sharing the database file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::application::ports::outbound::{LedgerError, QuotaLedgerPort};
use crate::domain::aggregates::QuotaLedger;
use crate::domain::events::EntityStoredEvent;
use crate::domain::value_objects::WorldId;

/// Attempts before a conditional update that keeps missing is reported
const MAX_APPLY_ATTEMPTS: usize = 5;

pub struct SqliteQuotaLedgerRepository {
    pool: SqlitePool,
}

impl SqliteQuotaLedgerRepository {
    /// Create the repository and ensure its table exists
    pub async fn new(pool: SqlitePool) -> Result<Self, LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storage_ledgers (
                world_id TEXT PRIMARY KEY,
                allocated_bytes INTEGER NOT NULL CHECK (allocated_bytes >= 0),
                used_bytes INTEGER NOT NULL DEFAULT 0 CHECK (used_bytes >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| LedgerError::database("create_table", e))?;

        Ok(Self { pool })
    }

    async fn fetch(&self, world_id: WorldId) -> Result<Option<QuotaLedger>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT world_id, allocated_bytes, used_bytes, created_at, updated_at
            FROM storage_ledgers
            WHERE world_id = ?
            "#,
        )
        .bind(world_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::database("get", e))?;

        row.map(|r| row_to_ledger(&r)).transpose()
    }

    async fn fetch_existing(&self, world_id: WorldId) -> Result<QuotaLedger, LedgerError> {
        self.fetch(world_id)
            .await?
            .ok_or(LedgerError::NotInitialized(world_id))
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::database("parse_timestamp", e))
}

fn row_to_ledger(row: &SqliteRow) -> Result<QuotaLedger, LedgerError> {
    let world_id: String = row.get("world_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(QuotaLedger {
        world_id: WorldId::parse(&world_id).map_err(|e| LedgerError::database("parse_row", e))?,
        allocated_bytes: row.get("allocated_bytes"),
        used_bytes: row.get("used_bytes"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl QuotaLedgerPort for SqliteQuotaLedgerRepository {
    async fn initialize(
        &self,
        owner_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError> {
        let ledger = QuotaLedger::new(owner_id, allocated_bytes)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO storage_ledgers
                (world_id, allocated_bytes, used_bytes, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(owner_id.to_string())
        .bind(ledger.allocated_bytes)
        .bind(ledger.created_at.to_rfc3339())
        .bind(ledger.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::database("initialize", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyInitialized(owner_id));
        }
        Ok(ledger)
    }

    async fn apply(&self, world_id: WorldId, delta: i64) -> Result<i64, LedgerError> {
        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            let committed: Option<i64> = sqlx::query_scalar(
                r#"
                UPDATE storage_ledgers
                SET used_bytes = used_bytes + ?, updated_at = ?
                WHERE world_id = ?
                  AND used_bytes + ? BETWEEN 0 AND allocated_bytes
                RETURNING used_bytes
                "#,
            )
            .bind(delta)
            .bind(Utc::now().to_rfc3339())
            .bind(world_id.to_string())
            .bind(delta)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::database("apply", e))?;

            if let Some(used_bytes) = committed {
                return Ok(used_bytes);
            }

            // The update matched nothing: either the world is unknown or the
            // delta breaks a bound. A fresh read tells which.
            let ledger = self.fetch_existing(world_id).await?;
            ledger.candidate(delta)?;
            debug!(world_id = %world_id, delta, attempt, "Ledger changed under apply, retrying");
        }

        Err(LedgerError::database(
            "apply",
            format!("usage kept changing after {} attempts", MAX_APPLY_ATTEMPTS),
        ))
    }

    async fn rebuild(
        &self,
        world_id: WorldId,
        events: &[EntityStoredEvent],
    ) -> Result<QuotaLedger, LedgerError> {
        let mut ledger = self.fetch_existing(world_id).await?;
        ledger.rebuild(events);

        sqlx::query(
            r#"
            UPDATE storage_ledgers
            SET used_bytes = ?, updated_at = ?
            WHERE world_id = ?
            "#,
        )
        .bind(ledger.used_bytes)
        .bind(ledger.updated_at.to_rfc3339())
        .bind(world_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::database("rebuild", e))?;

        Ok(ledger)
    }

    async fn increase_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError> {
        let mut ledger = self.fetch_existing(world_id).await?;
        ledger.increase_allocation(allocated_bytes)?;

        sqlx::query(
            r#"
            UPDATE storage_ledgers
            SET allocated_bytes = ?, updated_at = ?
            WHERE world_id = ? AND allocated_bytes <= ?
            "#,
        )
        .bind(ledger.allocated_bytes)
        .bind(ledger.updated_at.to_rfc3339())
        .bind(world_id.to_string())
        .bind(ledger.allocated_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::database("increase_allocation", e))?;

        self.fetch_existing(world_id).await
    }

    async fn remove(&self, world_id: WorldId) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM storage_ledgers WHERE world_id = ?")
            .bind(world_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::database("remove", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotInitialized(world_id));
        }
        Ok(())
    }

    async fn revert_allocation(
        &self,
        world_id: WorldId,
        allocated_bytes: i64,
    ) -> Result<QuotaLedger, LedgerError> {
        let mut ledger = self.fetch_existing(world_id).await?;
        ledger.revert_allocation(allocated_bytes)?;

        sqlx::query(
            r#"
            UPDATE storage_ledgers
            SET allocated_bytes = ?, updated_at = ?
            WHERE world_id = ? AND used_bytes <= ?
            "#,
        )
        .bind(ledger.allocated_bytes)
        .bind(ledger.updated_at.to_rfc3339())
        .bind(world_id.to_string())
        .bind(ledger.allocated_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::database("revert_allocation", e))?;

        self.fetch_existing(world_id).await
    }

    async fn get(&self, world_id: WorldId) -> Result<Option<QuotaLedger>, LedgerError> {
        self.fetch(world_id).await
    }

    async fn list(&self) -> Result<Vec<QuotaLedger>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT world_id, allocated_bytes, used_bytes, created_at, updated_at
            FROM storage_ledgers
            ORDER BY created_at ASC, world_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::database("list", e))?;

        rows.iter().map(row_to_ledger).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::QuotaError;
    use crate::domain::events::EventMetadata;
    use crate::domain::value_objects::{EntityId, EntityType};
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::sync::Arc;
    use std::time::Duration;

    async fn repository() -> SqliteQuotaLedgerRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteQuotaLedgerRepository::new(pool).await.unwrap()
    }

    /// Database file shared by several pooled connections, so writers really race
    async fn file_repository(dir: &tempfile::TempDir, connections: u32) -> SqliteQuotaLedgerRepository {
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("ledger.db"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(connections)
            .connect_with(options)
            .await
            .unwrap();
        SqliteQuotaLedgerRepository::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_read_back() {
        let repo = repository().await;
        let world_id = WorldId::new();

        let created = repo.initialize(world_id, 500).await.unwrap();
        let loaded = repo.get(world_id).await.unwrap().unwrap();

        assert_eq!(loaded.world_id, world_id);
        assert_eq!(loaded.allocated_bytes, 500);
        assert_eq!(loaded.used_bytes, 0);
        assert_eq!(loaded.created_at, created.created_at);
        assert_eq!(
            repo.initialize(world_id, 1).await.unwrap_err(),
            LedgerError::AlreadyInitialized(world_id)
        );
    }

    #[tokio::test]
    async fn test_apply_enforces_both_bounds() {
        let repo = repository().await;
        let world_id = WorldId::new();
        repo.initialize(world_id, 100).await.unwrap();

        assert_eq!(repo.apply(world_id, 70).await.unwrap(), 70);
        assert_eq!(repo.apply(world_id, 30).await.unwrap(), 100);

        let err = repo.apply(world_id, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::Quota(QuotaError::QuotaExceeded { .. })));
        let err = repo.apply(world_id, -101).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Quota(QuotaError::NegativeResultingUsage { .. })
        ));

        assert_eq!(repo.get(world_id).await.unwrap().unwrap().used_bytes, 100);
    }

    #[tokio::test]
    async fn test_overflowing_delta_is_quota_exceeded() {
        let repo = repository().await;
        let world_id = WorldId::new();
        repo.initialize(world_id, i64::MAX).await.unwrap();
        repo.apply(world_id, 10).await.unwrap();

        let err = repo.apply(world_id, i64::MAX).await.unwrap_err();
        assert!(matches!(err, LedgerError::Quota(QuotaError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn test_apply_on_unknown_world_fails() {
        let repo = repository().await;
        let world_id = WorldId::new();
        assert_eq!(
            repo.apply(world_id, 5).await.unwrap_err(),
            LedgerError::NotInitialized(world_id)
        );
    }

    #[tokio::test]
    async fn test_rebuild_overwrites_usage() {
        let repo = repository().await;
        let world_id = WorldId::new();
        repo.initialize(world_id, 1000).await.unwrap();
        repo.apply(world_id, 900).await.unwrap();

        let stored = |size, used_bytes_after| EntityStoredEvent {
            metadata: EventMetadata::default(),
            world_id,
            entity_type: EntityType::Party,
            entity_id: EntityId::new(),
            size,
            used_bytes_after,
        };
        let history = vec![stored(100, 100), stored(250, 350)];

        let rebuilt = repo.rebuild(world_id, &history).await.unwrap();
        assert_eq!(rebuilt.used_bytes, 350);
        assert_eq!(repo.get(world_id).await.unwrap().unwrap().used_bytes, 350);

        let rebuilt = repo.rebuild(world_id, &[]).await.unwrap();
        assert_eq!(rebuilt.used_bytes, 0);
    }

    #[tokio::test]
    async fn test_allocation_only_grows() {
        let repo = repository().await;
        let world_id = WorldId::new();
        repo.initialize(world_id, 100).await.unwrap();

        let raised = repo.increase_allocation(world_id, 250).await.unwrap();
        assert_eq!(raised.allocated_bytes, 250);

        let err = repo.increase_allocation(world_id, 200).await.unwrap_err();
        assert!(matches!(err, LedgerError::Quota(QuotaError::InvalidAllocation { .. })));
        assert_eq!(repo.get(world_id).await.unwrap().unwrap().allocated_bytes, 250);
    }

    #[tokio::test]
    async fn test_remove_and_revert_allocation() {
        let repo = repository().await;
        let world_id = WorldId::new();
        repo.initialize(world_id, 100).await.unwrap();
        repo.increase_allocation(world_id, 300).await.unwrap();
        repo.apply(world_id, 150).await.unwrap();

        let err = repo.revert_allocation(world_id, 100).await.unwrap_err();
        assert!(matches!(err, LedgerError::Quota(QuotaError::InvalidAllocation { .. })));

        repo.apply(world_id, -100).await.unwrap();
        let reverted = repo.revert_allocation(world_id, 100).await.unwrap();
        assert_eq!(reverted.allocated_bytes, 100);
        assert_eq!(reverted.used_bytes, 50);

        repo.remove(world_id).await.unwrap();
        assert!(repo.get(world_id).await.unwrap().is_none());
        assert_eq!(
            repo.remove(world_id).await.unwrap_err(),
            LedgerError::NotInitialized(world_id)
        );
        repo.initialize(world_id, 10).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_across_connections_never_overshoot() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Arc::new(file_repository(&dir, 8).await);
        let world_id = WorldId::new();
        repo.initialize(world_id, 1000).await.unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.apply(world_id, 70).await })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(LedgerError::Quota(QuotaError::QuotaExceeded { .. })) => {}
                Err(other) => panic!("unexpected ledger error: {}", other),
            }
        }

        let used = repo.get(world_id).await.unwrap().unwrap().used_bytes;
        assert_eq!(accepted, 1000 / 70);
        assert_eq!(used, accepted * 70);
        assert!(used <= 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_racing_stores_have_one_winner() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Arc::new(file_repository(&dir, 4).await);
        let world_id = WorldId::new();
        repo.initialize(world_id, 1000).await.unwrap();
        repo.apply(world_id, 300).await.unwrap();

        let racers: Vec<_> = (0..2)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.apply(world_id, 400).await })
            })
            .collect();
        let mut results = Vec::new();
        for racer in racers {
            results.push(racer.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(LedgerError::Quota(QuotaError::QuotaExceeded { .. }))))
                .count(),
            1
        );
        assert_eq!(repo.get(world_id).await.unwrap().unwrap().used_bytes, 700);
    }

    #[tokio::test]
    async fn test_list_returns_all_ledgers() {
        let repo = repository().await;
        let ids = [WorldId::new(), WorldId::new()];
        for id in ids {
            repo.initialize(id, 10).await.unwrap();
        }

        let mut listed: Vec<WorldId> = repo.list().await.unwrap().iter().map(|l| l.world_id).collect();
        listed.sort();
        let mut expected = ids.to_vec();
        expected.sort();
        assert_eq!(listed, expected);
    }
}
