// Host vitals via sysinfo + procfs

pub(crate) mod linux;

use crate::models::HostVitals;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Disks, System};
use tracing::instrument;

pub struct HostRepo {
    sys: Arc<Mutex<System>>,
    last_cpu_refresh: Arc<Mutex<Option<(Instant, f64)>>>,
}

impl Default for HostRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRepo {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        Self {
            sys: Arc::new(Mutex::new(sys)),
            last_cpu_refresh: Arc::new(Mutex::new(None)),
        }
    }

    /// CPU%, memory% and TCP connection counts. TCP counts read as 0 where procfs is missing.
    #[instrument(skip(self), fields(repo = "host", operation = "vitals"))]
    pub async fn vitals(&self) -> anyhow::Result<HostVitals> {
        let sys = self.sys.clone();
        let last_cpu_refresh = self.last_cpu_refresh.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;

            let now = Instant::now();
            let cpu_percent = match last_cpu_refresh.lock() {
                Ok(mut guard) => match *guard {
                    Some((prev_ts, prev_usage))
                        if now.duration_since(prev_ts) < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL =>
                    {
                        prev_usage
                    }
                    Some(_) => {
                        sys.refresh_cpu_all();
                        let usage = sys.global_cpu_usage() as f64;
                        *guard = Some((now, usage));
                        usage
                    }
                    None => {
                        // First call only establishes the baseline
                        sys.refresh_cpu_all();
                        *guard = Some((now, 0.0));
                        0.0
                    }
                },
                Err(_) => {
                    sys.refresh_cpu_all();
                    0.0
                }
            };

            sys.refresh_memory();
            let total = sys.total_memory();
            let used = total.saturating_sub(sys.available_memory());
            let memory_percent = if total > 0 {
                (used as f64 / total as f64) * 100.0
            } else {
                0.0
            };

            let tcp = linux::read_tcp_counts(None).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "tcp tables unavailable, reporting 0 connections");
                linux::TcpCounts::default()
            });

            Ok(HostVitals {
                cpu_percent: cpu_percent.clamp(0.0, 100.0),
                memory_percent,
                tcp_established: tcp.established,
                tcp_total: tcp.total,
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("host task join: {}", e))?
    }
}

/// (free, total) bytes of the filesystem holding `path`.
///
/// The owning mount comes from the mount table and sysinfo must list exactly that mount point.
/// A mount sysinfo skips reports None, never the space of the filesystem underneath it.
/// Without a readable mount table the longest listed prefix is used.
pub(crate) fn space_for_path(disks: &Disks, path: &Path) -> Option<(u64, u64)> {
    let listed = disks
        .list()
        .iter()
        .map(|d| (d.mount_point(), d.available_space(), d.total_space()));
    match linux::read_mounts() {
        Ok(mounts) => exact_space(listed, owning_mount(&mounts, path)?),
        Err(e) => {
            tracing::debug!(error = %e, "mount table unreadable, matching disks by prefix");
            listed
                .filter(|(mount, _, _)| path.starts_with(mount))
                .max_by_key(|(mount, _, _)| mount.as_os_str().len())
                .map(|(_, free, total)| (free, total))
        }
    }
}

/// Target of the innermost mount containing `path`.
pub(crate) fn owning_mount<'a>(mounts: &'a [linux::MountEntry], path: &Path) -> Option<&'a Path> {
    mounts
        .iter()
        .map(|m| Path::new(m.target.as_str()))
        .filter(|target| path.starts_with(target))
        .max_by_key(|target| target.as_os_str().len())
}

fn exact_space<'a>(
    listed: impl IntoIterator<Item = (&'a Path, u64, u64)>,
    mount: &Path,
) -> Option<(u64, u64)> {
    listed
        .into_iter()
        .find(|(listed_mount, _, _)| *listed_mount == mount)
        .map(|(_, free, total)| (free, total))
}

/// Whether `path` (canonicalized) is itself a mount target. Err when the table is unreadable.
pub(crate) fn is_mount_target(path: &Path) -> std::io::Result<bool> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mounts = linux::read_mounts()?;
    Ok(mounts.iter().any(|m| Path::new(m.target.as_str()) == canonical))
}
