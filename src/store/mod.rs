// SQLite metric store: local-host records, NAS samples, user activity, backup summaries.
// Scalars are columns; raw snapshots and warning lists are versioned wincode BLOBs.

mod blob;
mod nas;
mod records;

use crate::models::BackupSummary;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub struct MetricStore {
    pool: SqlitePool,
    retention_ms: i64,
}

pub(crate) fn now_ms() -> anyhow::Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_millis() as i64)
}

impl MetricStore {
    pub async fn connect(path: &str, max_pool_size: u32, retention_days: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metric_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                elapsed_secs REAL NOT NULL,
                net_rx_per_sec REAL NOT NULL,
                net_tx_per_sec REAL NOT NULL,
                reads_per_sec REAL NOT NULL,
                writes_per_sec REAL NOT NULL,
                disk_free_bytes INTEGER NOT NULL,
                disk_queue_length INTEGER NOT NULL,
                latency_ms REAL,
                counter_reset INTEGER NOT NULL,
                cpu_percent REAL NOT NULL,
                memory_percent REAL NOT NULL,
                tcp_established INTEGER NOT NULL,
                tcp_total INTEGER NOT NULL,
                requests_per_sec REAL NOT NULL,
                snapshot_data BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metric_records_created_at ON metric_records(created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nas_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                available INTEGER NOT NULL,
                status TEXT NOT NULL,
                free_bytes INTEGER,
                total_bytes INTEGER,
                usage_percent REAL,
                latency_ms REAL,
                read_mbps REAL,
                write_mbps REAL,
                read_iops REAL,
                write_iops REAL,
                total_iops REAL,
                file_count INTEGER,
                concurrent_users INTEGER NOT NULL,
                warnings_data BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_nas_metrics_created_at ON nas_metrics(created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_activity (user_id TEXT PRIMARY KEY, last_seen_at INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backup_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                finished_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record activity for a principal (called by the authentication layer).
    #[instrument(skip(self), fields(repo = "store", operation = "touch_user"))]
    pub async fn touch_user(&self, user_id: &str, seen_at_ms: i64) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO user_activity (user_id, last_seen_at) VALUES ($1, $2)
             ON CONFLICT(user_id) DO UPDATE SET last_seen_at = MAX(last_seen_at, excluded.last_seen_at)",
        )
        .bind(user_id)
        .bind(seen_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_active_users_since(&self, since_ms: i64) -> anyhow::Result<u64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_activity WHERE last_seen_at >= $1",
        )
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    /// Written by the backup subsystem; read here for the health report.
    pub async fn record_backup(&self, backup: &BackupSummary) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO backup_runs (name, status, finished_at, size_bytes) VALUES ($1, $2, $3, $4)",
        )
        .bind(&backup.name)
        .bind(&backup.status)
        .bind(backup.finished_at as i64)
        .bind(backup.size_bytes as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_backup(&self) -> anyhow::Result<Option<BackupSummary>> {
        let row = sqlx::query(
            "SELECT name, status, finished_at, size_bytes FROM backup_runs ORDER BY finished_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(BackupSummary {
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            finished_at: row.try_get::<i64, _>("finished_at")?.max(0) as u64,
            size_bytes: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        }))
    }

    /// Delete metric and NAS rows older than the retention window. Returns rows removed.
    #[instrument(skip(self), fields(repo = "store", operation = "prune_old_data"))]
    pub async fn prune_old_data(&self) -> anyhow::Result<u64> {
        let cutoff = now_ms()? - self.retention_ms;
        self.prune_before(cutoff).await
    }

    pub async fn prune_before(&self, cutoff_ms: i64) -> anyhow::Result<u64> {
        let records = sqlx::query("DELETE FROM metric_records WHERE created_at < $1")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        let nas = sqlx::query("DELETE FROM nas_metrics WHERE created_at < $1")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(records.rows_affected() + nas.rows_affected())
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "store", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}
