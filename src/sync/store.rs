//! Checkpoint persistence
//!
//! SQLite storage for the latest snapshot and write timestamp of each source.
//! Snapshot and timestamp live in separate tables and are always upserted
//! together in one transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use super::fingerprint::Fingerprint;
use super::types::{Checkpoint, Snapshot};

/// Checkpoint store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No checkpoint for the given source (or for any source)
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Snapshot encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt checkpoint for {source_id}: {detail}")]
    Corrupt { source_id: String, detail: String },

    #[error("Checkpoint store call timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Persistent record of per-source checkpoints
///
/// Exactly one checkpoint exists per source; writes replace it whole.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Upsert a source's checkpoint atomically
    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Checkpoint with the newest timestamp; ties go to the smallest source id
    async fn read_latest_checkpoint(&self) -> Result<Checkpoint, StoreError>;

    /// A specific source's checkpoint
    async fn read_checkpoint(&self, source_id: &str) -> Result<Checkpoint, StoreError>;

    /// Every checkpoint, ordered by source id
    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError>;

    /// Remove all checkpoints
    async fn reset(&self) -> Result<(), StoreError>;
}

/// SQLite-backed checkpoint store
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-width UTC text, so lexical order equals chronological order
fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const SELECT_CHECKPOINT: &str = r#"
    SELECT sd.source_id, sd.data, sd.fingerprint, ts.timestamp
    FROM sheet_data sd
    JOIN sheet_timestamps ts ON sd.source_id = ts.source_id
"#;

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let data = serde_json::to_string(&checkpoint.snapshot)?;
        let timestamp = encode_timestamp(&checkpoint.timestamp);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sheet_data (source_id, data, fingerprint)
            VALUES (?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                data = excluded.data,
                fingerprint = excluded.fingerprint
            "#,
        )
        .bind(&checkpoint.source_id)
        .bind(&data)
        .bind(checkpoint.fingerprint.to_hex())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sheet_timestamps (source_id, timestamp)
            VALUES (?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                timestamp = excluded.timestamp
            "#,
        )
        .bind(&checkpoint.source_id)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn read_latest_checkpoint(&self) -> Result<Checkpoint, StoreError> {
        let query = format!(
            "{SELECT_CHECKPOINT} ORDER BY ts.timestamp DESC, sd.source_id ASC LIMIT 1"
        );

        let row = sqlx::query_as::<_, CheckpointRow>(&query)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("no checkpoint recorded yet".to_string()))?;

        row.into_checkpoint()
    }

    async fn read_checkpoint(&self, source_id: &str) -> Result<Checkpoint, StoreError> {
        let query = format!("{SELECT_CHECKPOINT} WHERE sd.source_id = ?");

        let row = sqlx::query_as::<_, CheckpointRow>(&query)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(source_id.to_string()))?;

        row.into_checkpoint()
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let query = format!("{SELECT_CHECKPOINT} ORDER BY sd.source_id ASC");

        let rows = sqlx::query_as::<_, CheckpointRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_checkpoint()).collect()
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sheet_data").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sheet_timestamps").execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::info!("Checkpoint store reset");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    source_id: String,
    data: String,
    fingerprint: String,
    timestamp: String,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> Result<Checkpoint, StoreError> {
        let corrupt = |detail: String| StoreError::Corrupt {
            source_id: self.source_id.clone(),
            detail,
        };

        let snapshot: Snapshot = serde_json::from_str(&self.data)?;
        let fingerprint: Fingerprint = self
            .fingerprint
            .parse()
            .map_err(|e: super::fingerprint::InvalidFingerprint| corrupt(e.to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| corrupt(format!("bad timestamp {}: {}", self.timestamp, e)))?
            .with_timezone(&Utc);

        Ok(Checkpoint {
            source_id: self.source_id,
            snapshot,
            fingerprint,
            timestamp,
        })
    }
}
