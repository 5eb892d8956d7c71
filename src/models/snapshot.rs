// Raw counter snapshot and the per-second rates derived from two of them

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// Point-in-time raw counter values. Never mutated; the next sample supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Capture time, epoch milliseconds.
    pub captured_at: u64,
    /// Cumulative bytes received, summed over all non-loopback interfaces.
    pub net_bytes_received: u64,
    /// Cumulative bytes sent, summed over all non-loopback interfaces.
    pub net_bytes_sent: u64,
    /// Cumulative completed reads on the aggregate disk instance.
    pub disk_reads: u64,
    /// Cumulative completed writes on the aggregate disk instance.
    pub disk_writes: u64,
    pub disk_free_bytes: u64,
    /// I/Os in flight at capture time (instantaneous).
    #[serde(default)]
    pub disk_queue_length: u64,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Counter domains whose query failed for this sample (their fields read as 0).
    #[serde(default)]
    pub degraded: Vec<String>,
}

impl Snapshot {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Rates between two snapshots. Free space, queue length and latency are carried
/// through from the current snapshot unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMetric {
    pub elapsed_secs: f64,
    pub net_received_bytes_per_sec: f64,
    pub net_sent_bytes_per_sec: f64,
    pub reads_per_sec: f64,
    pub writes_per_sec: f64,
    pub disk_free_bytes: u64,
    pub disk_queue_length: u64,
    pub latency_ms: Option<f64>,
    /// True when at least one cumulative counter went backwards (clamped to 0).
    #[serde(default)]
    pub counter_reset: bool,
}

impl DeltaMetric {
    /// All-zero rates carrying the instantaneous fields of `current`.
    pub fn zero(current: &Snapshot) -> Self {
        Self {
            elapsed_secs: 0.0,
            net_received_bytes_per_sec: 0.0,
            net_sent_bytes_per_sec: 0.0,
            reads_per_sec: 0.0,
            writes_per_sec: 0.0,
            disk_free_bytes: current.disk_free_bytes,
            disk_queue_length: current.disk_queue_length,
            latency_ms: current.latency_ms,
            counter_reset: false,
        }
    }
}
