//! SQLite Storage Event Repository - Append-only storage event log
//!
//! Events are stored as JSON alongside their type and world so that a world's
//! history can be read without decoding the rest of the log.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::application::ports::outbound::{
    EventStoreError, RecordedEvent, StorageEventRepositoryPort,
};
use crate::domain::events::StorageEvent;
use crate::domain::value_objects::WorldId;

pub struct SqliteStorageEventRepository {
    pool: SqlitePool,
}

impl SqliteStorageEventRepository {
    /// Create a new repository and ensure the table exists
    pub async fn new(pool: SqlitePool) -> Result<Self, EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storage_events (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                world_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                occurred_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_storage_events_world
            ON storage_events(world_id, sequence)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        Ok(Self { pool })
    }
}

fn row_to_recorded(row: &SqliteRow) -> Result<RecordedEvent, EventStoreError> {
    let payload: String = row.get("payload");
    let event: StorageEvent = serde_json::from_str(&payload)
        .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

    Ok(RecordedEvent {
        sequence: row.get("sequence"),
        event,
    })
}

#[async_trait]
impl StorageEventRepositoryPort for SqliteStorageEventRepository {
    async fn append(&self, event: &StorageEvent) -> Result<i64, EventStoreError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO storage_events (world_id, event_type, payload, occurred_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(event.world_id().to_string())
        .bind(event.event_type())
        .bind(&payload)
        .bind(event.metadata().timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn list_for_world(&self, world_id: WorldId) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, payload
            FROM storage_events
            WHERE world_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(world_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_recorded).collect()
    }

    async fn fetch_since(
        &self,
        last_sequence: i64,
        limit: u32,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, payload
            FROM storage_events
            WHERE sequence > ?
            ORDER BY sequence ASC
            LIMIT ?
            "#,
        )
        .bind(last_sequence)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_recorded).collect()
    }
}
