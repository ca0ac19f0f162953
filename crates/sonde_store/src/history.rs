//! History store implementation over SQLite.

use chrono::Utc;
use sonde_protocol::{EngineStats, HistoryRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scan_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    kind TEXT NOT NULL,
    record TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

#[derive(Clone)]
pub struct HistoryStore {
    pool: Pool<Sqlite>,
}

impl HistoryStore {
    /// Open (and create if missing) a history database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        // WAL keeps concurrent worker appends from tripping over the writer
        // lock.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("history store ready: {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs.
    ///
    /// A single connection: each `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Append one record. Each append is a single atomic INSERT, safe under
    /// concurrent workers; a duplicate id is an append-only violation.
    pub async fn append(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let kind = match record {
            HistoryRecord::Scan(_) => "scan",
            HistoryRecord::Failure(_) => "failure",
        };
        let payload = serde_json::to_string(record)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO scan_history (id, filename, kind, record, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id())
        .bind(record.filename())
        .bind(kind)
        .bind(&payload)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("appended {} record {}", kind, record.id());
                Ok(())
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(record.id().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one record by id.
    pub async fn get(&self, id: &str) -> Result<HistoryRecord, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record FROM scan_history WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((payload,)) => Ok(serde_json::from_str(&payload)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    /// Most-recent-first listing, bounded by `limit`.
    ///
    /// Ordering is by append sequence, not by the stored timestamp, so it
    /// stays correct under concurrent submission.
    pub async fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT record FROM scan_history ORDER BY seq DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|(payload,)| serde_json::from_str(payload).map_err(StoreError::from))
            .collect()
    }

    /// Total records ever appended (results and failure markers).
    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Per-engine aggregates derived from persisted scan records.
    ///
    /// Computed fresh on every call; the store keeps no running counters.
    pub async fn engine_stats(&self) -> Result<BTreeMap<String, EngineStats>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT record FROM scan_history WHERE kind = 'scan' ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut totals: BTreeMap<String, (u64, f64)> = BTreeMap::new();
        let mut stats: BTreeMap<String, EngineStats> = BTreeMap::new();

        for (payload,) in rows {
            let record: HistoryRecord = serde_json::from_str(&payload)?;
            let Some(scan) = record.as_scan() else {
                continue;
            };
            for engine in &scan.engines_used {
                let (count, total_ms) = totals.entry(engine.clone()).or_default();
                *count += 1;
                *total_ms += scan.scan_duration_ms as f64;
                let entry = stats.entry(engine.clone()).or_default();
                entry.scans_completed = *count;
                entry.avg_time_ms = *total_ms / *count as f64;
                entry.last_used = Some(scan.timestamp);
            }
        }

        Ok(stats)
    }
}
