// Linux counters: sysinfo for network interfaces and free space, /proc/diskstats for disk ops.

use super::{CounterReader, now_ms};
use crate::error::MetricsError;
use crate::host::{linux, space_for_path};
use crate::models::Snapshot;
use std::path::PathBuf;
use std::sync::Mutex;
use sysinfo::{Disks, Networks};

pub struct ProcfsCounterReader {
    networks: Mutex<Networks>,
    disks: Mutex<Disks>,
    volume: PathBuf,
}

impl ProcfsCounterReader {
    pub fn new(volume: PathBuf) -> Self {
        Self {
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            volume,
        }
    }

    /// (received, sent) summed over every interface except loopback.
    fn network_totals(&self) -> Result<(u64, u64), String> {
        let mut networks = self
            .networks
            .lock()
            .map_err(|e| format!("networks lock poisoned: {}", e))?;
        networks.refresh(true);
        Ok(networks
            .list()
            .iter()
            .filter(|(name, _)| !is_loopback_interface(name))
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            }))
    }

    fn free_space(&self) -> Result<u64, String> {
        let mut disks = self
            .disks
            .lock()
            .map_err(|e| format!("disks lock poisoned: {}", e))?;
        disks.refresh(true);
        space_for_path(&disks, &self.volume)
            .map(|(free, _)| free)
            .ok_or_else(|| format!("no disk mounted at {}", self.volume.display()))
    }
}

fn is_loopback_interface(name: &str) -> bool {
    name == "lo" || name.starts_with("lo:") || name.eq_ignore_ascii_case("loopback")
}

impl CounterReader for ProcfsCounterReader {
    fn sample(&self) -> Result<Snapshot, MetricsError> {
        let captured_at = now_ms();
        let mut degraded = Vec::new();

        let (net_bytes_received, net_bytes_sent) = self.network_totals().unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "network_totals", "network counters unavailable");
            degraded.push(format!("network: {}", e));
            (0, 0)
        });
        let disk = linux::read_disk_totals().unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "read_disk_totals", "disk counters unavailable");
            degraded.push(format!("disk: {}", e));
            linux::DiskTotals::default()
        });
        let disk_free_bytes = self.free_space().unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "free_space", "free space unavailable");
            degraded.push(format!("free_space: {}", e));
            0
        });

        if degraded.len() == 3 {
            return Err(MetricsError::QueryFailure(degraded.join("; ")));
        }

        Ok(Snapshot {
            captured_at,
            net_bytes_received,
            net_bytes_sent,
            disk_reads: disk.reads,
            disk_writes: disk.writes,
            disk_free_bytes,
            disk_queue_length: disk.in_flight,
            latency_ms: None,
            degraded,
        })
    }

    fn name(&self) -> &'static str {
        "procfs"
    }
}
