//! SQLite-backed snapshot storage (the strongest tier)
//!
//! One `snapshots` table holds every collection partition, keyed by
//! (collection, record id). Saves clear the partition and re-insert inside
//! a single transaction so the durable copy exactly mirrors the in-memory
//! collection, never a partial merge.

use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use storeboard_common::Result;
use tracing::{info, warn};

use super::SNAPSHOT_SCHEMA_VERSION;

pub struct IndexedStore {
    pool: SqlitePool,
}

impl IndexedStore {
    /// Open (creating if needed) the snapshot database
    pub async fn open(db_path: &Path) -> Result<IndexedStore> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        if newly_created {
            info!("Initialized new snapshot database: {}", db_path.display());
        } else {
            info!("Opened existing snapshot database: {}", db_path.display());
        }

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(SNAPSHOT_SCHEMA_VERSION as i64)
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                record TEXT NOT NULL,
                saved_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_collection ON snapshots(collection)",
        )
        .execute(&pool)
        .await?;

        Ok(IndexedStore { pool })
    }

    /// Write-then-read-then-clean side-effect test
    pub async fn probe(&self) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO snapshots (collection, id, record) VALUES ('__probe__', 'probe', '{}')")
            .execute(&self.pool)
            .await?;
        let _: String = sqlx::query_scalar(
            "SELECT record FROM snapshots WHERE collection = '__probe__' AND id = 'probe'",
        )
        .fetch_one(&self.pool)
        .await?;
        sqlx::query("DELETE FROM snapshots WHERE collection = '__probe__'")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace a collection partition with the given rows atomically
    pub async fn save(&self, collection: &str, rows: &[Value]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM snapshots WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            let Some(id) = row.get("id").and_then(Value::as_str) else {
                // Snapshot rows are keyed by id; a row without one is
                // best-effort dropped rather than failing the write.
                warn!("Skipping {} snapshot row without an id", collection);
                continue;
            };
            sqlx::query("INSERT OR REPLACE INTO snapshots (collection, id, record) VALUES (?, ?, ?)")
                .bind(collection)
                .bind(id)
                .bind(row.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load all rows of a collection partition (empty when absent)
    pub async fn load(&self, collection: &str) -> Result<Vec<Value>> {
        let records: Vec<String> =
            sqlx::query_scalar("SELECT record FROM snapshots WHERE collection = ? ORDER BY id")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_str(&record) {
                Ok(value) => rows.push(value),
                Err(e) => warn!("Skipping corrupt {} snapshot row: {}", collection, e),
            }
        }
        Ok(rows)
    }
}
