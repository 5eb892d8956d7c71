// Persisted local-host metric row

use serde::{Deserialize, Serialize};

use super::{DeltaMetric, Snapshot};

/// Host vitals recorded next to each delta (tier fields).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostVitals {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub tcp_established: u64,
    pub tcp_total: u64,
}

/// One row per successful poll; append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub created_at: u64,
    pub delta: DeltaMetric,
    pub vitals: HostVitals,
    /// Application requests per second over the same interval as `delta`.
    pub requests_per_sec: f64,
    /// Raw counters the delta was computed up to.
    pub snapshot: Snapshot,
}
