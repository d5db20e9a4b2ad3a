//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Latest snapshot per source
CREATE TABLE IF NOT EXISTS sheet_data (
    source_id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    fingerprint TEXT NOT NULL
);

-- Latest write timestamp per source, upserted together with sheet_data
CREATE TABLE IF NOT EXISTS sheet_timestamps (
    source_id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sheet_timestamps_timestamp ON sheet_timestamps(timestamp);
"#;
