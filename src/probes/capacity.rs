// Free/total space of a volume via sysinfo's disk list (network and tmpfs mounts included).

use crate::host::space_for_path;
use crate::models::Capacity;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::Disks;
use tracing::instrument;

pub struct CapacityProbe {
    disks: Arc<Mutex<Disks>>,
    timeout: Duration,
}

impl CapacityProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            disks: Arc::new(Mutex::new(Disks::new_with_refreshed_list())),
            timeout,
        }
    }

    /// None when the volume is missing, its own mount is not in the disk list, or the query
    /// exceeds the deadline. A parent filesystem never stands in for an unlisted mount.
    #[instrument(skip(self), fields(probe = "capacity", operation = "capacity"))]
    pub async fn capacity(&self, volume: &Path) -> Option<Capacity> {
        let disks = self.disks.clone();
        let volume: PathBuf = volume.to_path_buf();
        let task = tokio::task::spawn_blocking(move || {
            if !volume.is_dir() {
                return None;
            }
            let mut disks = disks.lock().ok()?;
            // Pick up mounts that appeared since the last call
            disks.refresh(true);
            let canonical = volume.canonicalize().unwrap_or(volume);
            space_for_path(&disks, &canonical)
        });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Some((free, total)))) => Some(Capacity::from_space(free, total)),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "capacity task failed");
                None
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "capacity query timed out");
                None
            }
        }
    }
}
