// Cumulative counter sources behind one trait. The platform is probed once at startup.

pub mod fake;
mod procfs;

pub use procfs::ProcfsCounterReader;

use crate::error::MetricsError;
use crate::models::Snapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Blocking read of raw counters. Callers run it on the blocking pool under a deadline.
pub trait CounterReader: Send + Sync + 'static {
    fn sample(&self) -> Result<Snapshot, MetricsError>;

    /// Short identifier for logs.
    fn name(&self) -> &'static str;
}

/// Every sample fails with `PlatformUnsupported`; selected when no counter source exists.
pub struct UnsupportedCounterReader {
    reason: String,
}

impl UnsupportedCounterReader {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl CounterReader for UnsupportedCounterReader {
    fn sample(&self) -> Result<Snapshot, MetricsError> {
        Err(MetricsError::PlatformUnsupported(self.reason.clone()))
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

/// Pick the counter source for this host. `volume` is the path whose free space is reported.
pub fn detect(volume: &Path) -> Arc<dyn CounterReader> {
    if cfg!(target_os = "linux") && Path::new(crate::host::linux::DISKSTATS_PATH).exists() {
        tracing::info!(reader = "procfs", volume = %volume.display(), "counter reader selected");
        Arc::new(ProcfsCounterReader::new(PathBuf::from(volume)))
    } else {
        let reason = format!(
            "no disk counter source on {} (missing {})",
            std::env::consts::OS,
            crate::host::linux::DISKSTATS_PATH
        );
        tracing::warn!(reason = %reason, "local-host sampling disabled");
        Arc::new(UnsupportedCounterReader::new(reason))
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
