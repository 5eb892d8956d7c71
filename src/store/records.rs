// metric_records: one row per successful local-host poll.

use super::{MetricStore, blob};
use crate::models::{DeltaMetric, HostVitals, MetricRecord, Snapshot};
use sqlx::Row;
use tracing::instrument;

const RECORD_COLUMNS: &str = "created_at, elapsed_secs, net_rx_per_sec, net_tx_per_sec, reads_per_sec, writes_per_sec,
    disk_free_bytes, disk_queue_length, latency_ms, counter_reset, cpu_percent, memory_percent,
    tcp_established, tcp_total, requests_per_sec, snapshot_data";

impl MetricStore {
    #[instrument(skip(self, record), fields(repo = "store", operation = "save_metric_record", created_at = record.created_at))]
    pub async fn save_metric_record(&self, record: &MetricRecord) -> anyhow::Result<()> {
        let snapshot_data = blob::with_version_prefix(
            wincode::serialize(&record.snapshot).map_err(|e| anyhow::anyhow!("wincode: {}", e))?,
        );
        let d = &record.delta;
        let v = &record.vitals;
        sqlx::query(
            r#"
            INSERT INTO metric_records
            (created_at, elapsed_secs, net_rx_per_sec, net_tx_per_sec, reads_per_sec, writes_per_sec,
             disk_free_bytes, disk_queue_length, latency_ms, counter_reset, cpu_percent, memory_percent,
             tcp_established, tcp_total, requests_per_sec, snapshot_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.created_at as i64)
        .bind(d.elapsed_secs)
        .bind(d.net_received_bytes_per_sec)
        .bind(d.net_sent_bytes_per_sec)
        .bind(d.reads_per_sec)
        .bind(d.writes_per_sec)
        .bind(d.disk_free_bytes as i64)
        .bind(d.disk_queue_length as i64)
        .bind(d.latency_ms)
        .bind(d.counter_reset as i64)
        .bind(v.cpu_percent)
        .bind(v.memory_percent)
        .bind(v.tcp_established as i64)
        .bind(v.tcp_total as i64)
        .bind(record.requests_per_sec)
        .bind(&snapshot_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_metric_record(&self) -> anyhow::Result<Option<MetricRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM metric_records ORDER BY created_at DESC, id DESC LIMIT 1",
            RECORD_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_record_row).transpose()
    }

    /// Records in [from_ts, to_ts], newest `limit` of them, returned oldest first.
    #[instrument(skip(self), fields(repo = "store", operation = "metric_history"))]
    pub async fn metric_history(
        &self,
        from_ts: i64,
        to_ts: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<MetricRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM metric_records WHERE created_at >= $1 AND created_at <= $2
             ORDER BY created_at DESC, id DESC LIMIT $3",
            RECORD_COLUMNS
        ))
        .bind(from_ts)
        .bind(to_ts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut out = rows
            .iter()
            .map(parse_record_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }
}

fn parse_record_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<MetricRecord> {
    let created_at = row.try_get::<i64, _>("created_at")?.max(0) as u64;
    let delta = DeltaMetric {
        elapsed_secs: row.try_get("elapsed_secs")?,
        net_received_bytes_per_sec: row.try_get("net_rx_per_sec")?,
        net_sent_bytes_per_sec: row.try_get("net_tx_per_sec")?,
        reads_per_sec: row.try_get("reads_per_sec")?,
        writes_per_sec: row.try_get("writes_per_sec")?,
        disk_free_bytes: row.try_get::<i64, _>("disk_free_bytes")?.max(0) as u64,
        disk_queue_length: row.try_get::<i64, _>("disk_queue_length")?.max(0) as u64,
        latency_ms: row.try_get("latency_ms")?,
        counter_reset: row.try_get::<i64, _>("counter_reset")? != 0,
    };
    let vitals = HostVitals {
        cpu_percent: row.try_get("cpu_percent")?,
        memory_percent: row.try_get("memory_percent")?,
        tcp_established: row.try_get::<i64, _>("tcp_established")?.max(0) as u64,
        tcp_total: row.try_get::<i64, _>("tcp_total")?.max(0) as u64,
    };
    let snapshot_data: Vec<u8> = row.try_get("snapshot_data")?;
    let snapshot = blob::payload(&snapshot_data)
        .and_then(|p| match wincode::deserialize::<Snapshot>(p) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::debug!(error = %e, "wincode deserialize snapshot, rebuilding from columns");
                None
            }
        })
        .unwrap_or_else(|| Snapshot {
            captured_at: created_at,
            net_bytes_received: 0,
            net_bytes_sent: 0,
            disk_reads: 0,
            disk_writes: 0,
            disk_free_bytes: delta.disk_free_bytes,
            disk_queue_length: delta.disk_queue_length,
            latency_ms: delta.latency_ms,
            degraded: Vec::new(),
        });
    Ok(MetricRecord {
        created_at,
        delta,
        vitals,
        requests_per_sec: row.try_get("requests_per_sec")?,
        snapshot,
    })
}
