// NAS health aggregator: composes the probes and the user estimate into one report per call.
// Every signal degrades to None plus a warning; no report ever fails because a probe did.

use crate::error::MetricsError;
use crate::models::{
    BackupSummary, Capacity, CapacityStatus, ConnectionTest, NasHealth, NasMetric, WriteTest,
};
use crate::probes::{
    ARTIFACT_PREFIX, CapacityProbe, IopsPass, LatencyProbe, StorageIoProbe, VolumeState,
};
use crate::store::MetricStore;
use crate::users::ConcurrentUserEstimator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Backup statuses that do not raise a warning.
const BACKUP_OK_STATUSES: [&str; 3] = ["success", "completed", "ok"];

pub struct NasDeps {
    pub store: Arc<MetricStore>,
    pub users: Arc<ConcurrentUserEstimator>,
    pub latency: LatencyProbe,
    /// Resolved echo target (loopback already mapped to the share host); None skips the echo.
    pub latency_target: Option<String>,
    pub storage: StorageIoProbe,
    pub capacity: CapacityProbe,
    pub share_name: String,
    pub file_count_limit: u64,
    /// Deadline for store reads/writes made while building a report.
    pub timeout: Duration,
}

pub struct NasMonitor {
    deps: NasDeps,
}

impl NasMonitor {
    pub fn new(deps: NasDeps) -> Self {
        Self { deps }
    }

    pub fn mount_point(&self) -> &Path {
        self.deps.storage.root()
    }

    /// Availability, mount and write flags, capacity tier, latency and the last backup.
    #[instrument(skip(self), fields(component = "nas", operation = "health"))]
    pub async fn health(&self) -> NasHealth {
        let mut warnings = Vec::new();
        let volume = self.volume(&mut warnings).await;
        let available = volume.reachable;

        let (capacity, latency_ms) = tokio::join!(self.capacity(available), self.latency());
        let writable = if available {
            let test = self.deps.storage.test_write().await;
            if let Some(err) = test.error {
                warnings.push(format!("write test failed: {}", err));
            }
            test.writable
        } else {
            false
        };

        let status = self.classify(available, capacity.as_ref(), &mut warnings);
        if available && latency_ms.is_none() {
            warnings.push("latency probe unavailable".into());
        }
        let last_backup = self.last_backup(&mut warnings).await;

        if !warnings.is_empty() {
            tracing::info!(available, ?warnings, "nas health degraded");
        }
        NasHealth {
            checked_at: crate::counters::now_ms(),
            share_name: self.deps.share_name.clone(),
            mount_point: self.mount_point().display().to_string(),
            available,
            mounted: volume.mounted,
            writable,
            capacity,
            status,
            color: status.color().to_string(),
            latency_ms,
            last_backup,
            warnings,
        }
    }

    /// Cheap check for on-demand health actions: reachability, echo and a small write.
    #[instrument(skip(self), fields(component = "nas", operation = "test_connection"))]
    pub async fn test_connection(&self) -> ConnectionTest {
        let mut warnings = Vec::new();
        let available = self.volume(&mut warnings).await.reachable;
        let latency_ms = self.latency().await;
        if latency_ms.is_none() {
            warnings.push("latency probe unavailable".into());
        }
        let writable = if available {
            let test = self.deps.storage.test_write().await;
            if let Some(err) = test.error {
                warnings.push(format!("write test failed: {}", err));
            }
            test.writable
        } else {
            false
        };
        ConnectionTest {
            available,
            latency_ms,
            writable,
            warnings,
        }
    }

    pub async fn test_write(&self) -> WriteTest {
        self.deps.storage.test_write().await
    }

    /// One full measurement pass. IOPS is measured once per pass.
    #[instrument(skip(self), fields(component = "nas", operation = "collect"))]
    pub async fn collect(&self) -> NasMetric {
        let mut warnings = Vec::new();
        let available = self.volume(&mut warnings).await.reachable;

        let (capacity, latency_ms, concurrent_users) = tokio::join!(
            self.capacity(available),
            self.latency(),
            self.deps.users.estimate()
        );
        // Throughput and IOPS share the volume; running them together would skew both
        let throughput = self.deps.storage.measure_throughput().await;
        let pass = IopsPass::new();
        let iops = self.deps.storage.measure_iops(&pass).await;
        let file_count = if available {
            self.file_count(&mut warnings).await
        } else {
            None
        };

        let status = self.classify(available, capacity.as_ref(), &mut warnings);
        if available {
            if latency_ms.is_none() {
                warnings.push("latency probe unavailable".into());
            }
            if throughput.read_mbps.is_none() || throughput.write_mbps.is_none() {
                warnings.push("throughput probe unavailable".into());
            }
            if iops.read_iops.is_none() || iops.write_iops.is_none() {
                warnings.push("iops probe unavailable".into());
            }
        }

        NasMetric {
            created_at: crate::counters::now_ms(),
            available,
            capacity,
            status,
            latency_ms,
            throughput,
            total_iops: iops.total(),
            iops,
            file_count,
            concurrent_users,
            warnings,
        }
    }

    /// Collect and persist one NAS sample.
    pub async fn poll(&self) -> Result<NasMetric, MetricsError> {
        let metric = self.collect().await;
        tokio::time::timeout(self.deps.timeout, self.deps.store.save_nas_metric(&metric))
            .await
            .map_err(|_| MetricsError::Timeout("nas metric save"))??;
        tracing::debug!(
            available = metric.available,
            status = %metric.status,
            warnings = metric.warnings.len(),
            "nas metric recorded"
        );
        Ok(metric)
    }

    async fn latency(&self) -> Option<f64> {
        match self.deps.latency_target.as_deref() {
            Some(target) => self.deps.latency.ping(target).await,
            None => None,
        }
    }

    fn classify(
        &self,
        available: bool,
        capacity: Option<&Capacity>,
        warnings: &mut Vec<String>,
    ) -> CapacityStatus {
        let Some(capacity) = capacity else {
            if available {
                warnings.push("capacity unavailable".into());
            }
            return CapacityStatus::classify(available, 0.0);
        };
        let status = CapacityStatus::classify(available, capacity.usage_percent);
        if matches!(status, CapacityStatus::Warning | CapacityStatus::Critical) {
            warnings.push(format!(
                "volume usage at {}% ({})",
                capacity.usage_percent, status
            ));
        }
        status
    }

    /// Shared gate for every report: a missing root or a bare mount-point directory is not
    /// the volume, and nothing is measured against it.
    async fn volume(&self, warnings: &mut Vec<String>) -> VolumeState {
        let state = self.deps.storage.volume_state().await;
        if !state.present {
            warnings.push(format!("{} is not reachable", self.mount_point().display()));
        } else if !state.mounted {
            warnings.push(format!(
                "{} is not a mount point",
                self.mount_point().display()
            ));
        }
        state
    }

    async fn capacity(&self, available: bool) -> Option<Capacity> {
        if !available {
            return None;
        }
        self.deps.capacity.capacity(self.mount_point()).await
    }

    async fn last_backup(&self, warnings: &mut Vec<String>) -> Option<BackupSummary> {
        let backup = match tokio::time::timeout(self.deps.timeout, self.deps.store.latest_backup())
            .await
        {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, operation = "latest_backup", "backup lookup failed");
                warnings.push("backup history unavailable".into());
                return None;
            }
            Err(_) => {
                warnings.push("backup history unavailable".into());
                return None;
            }
        };
        match &backup {
            None => warnings.push("no backup recorded".into()),
            Some(b) if !BACKUP_OK_STATUSES.contains(&b.status.to_ascii_lowercase().as_str()) => {
                warnings.push(format!("last backup {} finished with status {}", b.name, b.status))
            }
            Some(_) => {}
        }
        backup
    }

    async fn file_count(&self, warnings: &mut Vec<String>) -> Option<u64> {
        let root = self.mount_point().to_path_buf();
        let limit = self.deps.file_count_limit;
        let task = tokio::task::spawn_blocking(move || count_files(root, limit));
        match tokio::time::timeout(self.deps.timeout, task).await {
            Ok(Ok(Ok((count, truncated)))) => {
                if truncated {
                    warnings.push(format!("file count stopped at {}", limit));
                }
                Some(count)
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, operation = "file_count", "file count failed");
                warnings.push("file count unavailable".into());
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, operation = "file_count", "file count task failed");
                warnings.push("file count unavailable".into());
                None
            }
            Err(_) => {
                warnings.push("file count timed out".into());
                None
            }
        }
    }
}

/// Regular files under `root`, stopping at `limit`. Unreadable subdirectories and the
/// probes' own artifacts are skipped.
fn count_files(root: PathBuf, limit: u64) -> std::io::Result<(u64, bool)> {
    let mut count = 0u64;
    let mut pending = vec![root];
    let mut first = true;
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if first => return Err(e),
            Err(_) => continue,
        };
        first = false;
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file()
                && !entry.file_name().to_string_lossy().starts_with(ARTIFACT_PREFIX)
            {
                count += 1;
                if count >= limit {
                    return Ok((count, true));
                }
            }
        }
    }
    Ok((count, false))
}
