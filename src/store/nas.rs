// nas_metrics: one row per NAS poll, plus rolling-period stats.

use super::{MetricStore, blob};
use crate::models::{Capacity, CapacityStatus, Iops, NasMetric, NasStats, Throughput, round2};
use sqlx::Row;
use tracing::instrument;

const NAS_COLUMNS: &str = "created_at, available, status, free_bytes, total_bytes, usage_percent, latency_ms,
    read_mbps, write_mbps, read_iops, write_iops, total_iops, file_count, concurrent_users, warnings_data";

impl MetricStore {
    #[instrument(skip(self, metric), fields(repo = "store", operation = "save_nas_metric", created_at = metric.created_at))]
    pub async fn save_nas_metric(&self, metric: &NasMetric) -> anyhow::Result<()> {
        let warnings_data = blob::with_version_prefix(
            wincode::serialize(&metric.warnings).map_err(|e| anyhow::anyhow!("wincode: {}", e))?,
        );
        let cap = metric.capacity.as_ref();
        sqlx::query(
            r#"
            INSERT INTO nas_metrics
            (created_at, available, status, free_bytes, total_bytes, usage_percent, latency_ms,
             read_mbps, write_mbps, read_iops, write_iops, total_iops, file_count, concurrent_users, warnings_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(metric.created_at as i64)
        .bind(metric.available as i64)
        .bind(metric.status.as_str())
        .bind(cap.map(|c| c.free_bytes as i64))
        .bind(cap.map(|c| c.total_bytes as i64))
        .bind(cap.map(|c| c.usage_percent))
        .bind(metric.latency_ms)
        .bind(metric.throughput.read_mbps)
        .bind(metric.throughput.write_mbps)
        .bind(metric.iops.read_iops)
        .bind(metric.iops.write_iops)
        .bind(metric.total_iops)
        .bind(metric.file_count.map(|n| n as i64))
        .bind(metric.concurrent_users as i64)
        .bind(&warnings_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_nas_metric(&self) -> anyhow::Result<Option<NasMetric>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM nas_metrics ORDER BY created_at DESC, id DESC LIMIT 1",
            NAS_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_nas_row).transpose()
    }

    /// NAS rows in [from_ts, to_ts], newest `limit` of them, returned oldest first.
    #[instrument(skip(self), fields(repo = "store", operation = "nas_history"))]
    pub async fn nas_history(
        &self,
        from_ts: i64,
        to_ts: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<NasMetric>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM nas_metrics WHERE created_at >= $1 AND created_at <= $2
             ORDER BY created_at DESC, id DESC LIMIT $3",
            NAS_COLUMNS
        ))
        .bind(from_ts)
        .bind(to_ts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut out = rows
            .iter()
            .map(parse_nas_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }

    /// Averages and peaks over rows created at or after `since_ms`.
    #[instrument(skip(self), fields(repo = "store", operation = "nas_stats"))]
    pub async fn nas_stats(&self, period: &str, since_ms: i64) -> anyhow::Result<NasStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS samples,
                AVG(CASE WHEN available != 0 THEN 100.0 ELSE 0.0 END) AS availability_percent,
                AVG(latency_ms) AS avg_latency_ms,
                MAX(latency_ms) AS max_latency_ms,
                AVG(read_mbps) AS avg_read_mbps,
                AVG(write_mbps) AS avg_write_mbps,
                AVG(total_iops) AS avg_total_iops,
                AVG(usage_percent) AS avg_usage_percent,
                MAX(usage_percent) AS max_usage_percent,
                AVG(CAST(concurrent_users AS REAL)) AS avg_concurrent_users,
                MAX(concurrent_users) AS max_concurrent_users
            FROM nas_metrics WHERE created_at >= $1
            "#,
        )
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;

        let rounded = |name: &str| -> anyhow::Result<Option<f64>> {
            Ok(row.try_get::<Option<f64>, _>(name)?.map(round2))
        };
        Ok(NasStats {
            period: period.to_string(),
            since: since_ms.max(0) as u64,
            samples: row.try_get::<i64, _>("samples")?.max(0) as u64,
            availability_percent: rounded("availability_percent")?.unwrap_or(0.0),
            avg_latency_ms: rounded("avg_latency_ms")?,
            max_latency_ms: rounded("max_latency_ms")?,
            avg_read_mbps: rounded("avg_read_mbps")?,
            avg_write_mbps: rounded("avg_write_mbps")?,
            avg_total_iops: rounded("avg_total_iops")?,
            avg_usage_percent: rounded("avg_usage_percent")?,
            max_usage_percent: rounded("max_usage_percent")?,
            avg_concurrent_users: rounded("avg_concurrent_users")?.unwrap_or(0.0),
            max_concurrent_users: row
                .try_get::<Option<i64>, _>("max_concurrent_users")?
                .unwrap_or(0)
                .max(0) as u64,
        })
    }
}

fn parse_nas_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<NasMetric> {
    let free: Option<i64> = row.try_get("free_bytes")?;
    let total: Option<i64> = row.try_get("total_bytes")?;
    let capacity = match (free, total) {
        (Some(free), Some(total)) => Some(Capacity::from_space(free.max(0) as u64, total.max(0) as u64)),
        _ => None,
    };
    let status: String = row.try_get("status")?;
    let warnings_data: Vec<u8> = row.try_get("warnings_data")?;
    let warnings = blob::payload(&warnings_data)
        .and_then(|p| match wincode::deserialize::<Vec<String>>(p) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::debug!(error = %e, "wincode deserialize warnings, using empty");
                None
            }
        })
        .unwrap_or_default();
    Ok(NasMetric {
        created_at: row.try_get::<i64, _>("created_at")?.max(0) as u64,
        available: row.try_get::<i64, _>("available")? != 0,
        capacity,
        status: CapacityStatus::from_stored(&status),
        latency_ms: row.try_get("latency_ms")?,
        throughput: Throughput {
            read_mbps: row.try_get("read_mbps")?,
            write_mbps: row.try_get("write_mbps")?,
        },
        iops: Iops {
            read_iops: row.try_get("read_iops")?,
            write_iops: row.try_get("write_iops")?,
        },
        total_iops: row.try_get("total_iops")?,
        file_count: row
            .try_get::<Option<i64>, _>("file_count")?
            .map(|n| n.max(0) as u64),
        concurrent_users: row.try_get::<i64, _>("concurrent_users")?.max(0) as u64,
        warnings,
    })
}
