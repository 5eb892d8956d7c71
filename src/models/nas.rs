// NAS volume models: capacity, status ladder, probe results and reports

use serde::{Deserialize, Serialize};
use std::fmt;

/// Usage at or above this is "warning".
pub const WARNING_USAGE_PERCENT: f64 = 75.0;
/// Usage at or above this is "critical".
pub const CRITICAL_USAGE_PERCENT: f64 = 90.0;

/// Tiered volume status. The only place the thresholds are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityStatus {
    Healthy,
    Warning,
    Critical,
    Offline,
}

impl CapacityStatus {
    pub fn classify(available: bool, usage_percent: f64) -> Self {
        if !available {
            CapacityStatus::Offline
        } else if usage_percent >= CRITICAL_USAGE_PERCENT {
            CapacityStatus::Critical
        } else if usage_percent >= WARNING_USAGE_PERCENT {
            CapacityStatus::Warning
        } else {
            CapacityStatus::Healthy
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            CapacityStatus::Healthy => "green",
            CapacityStatus::Warning => "orange",
            CapacityStatus::Critical | CapacityStatus::Offline => "red",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CapacityStatus::Healthy => "healthy",
            CapacityStatus::Warning => "warning",
            CapacityStatus::Critical => "critical",
            CapacityStatus::Offline => "offline",
        }
    }

    /// Parse the stored form; unknown strings read as offline.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "healthy" => CapacityStatus::Healthy,
            "warning" => CapacityStatus::Warning,
            "critical" => CapacityStatus::Critical,
            _ => CapacityStatus::Offline,
        }
    }
}

impl fmt::Display for CapacityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,
    /// used / total * 100, two decimals; 0 when total is 0.
    pub usage_percent: f64,
}

impl Capacity {
    pub fn from_space(free_bytes: u64, total_bytes: u64) -> Self {
        let free_bytes = free_bytes.min(total_bytes);
        let used_bytes = total_bytes - free_bytes;
        let usage_percent = if total_bytes > 0 {
            round2(used_bytes as f64 / total_bytes as f64 * 100.0)
        } else {
            0.0
        };
        Self {
            free_bytes,
            total_bytes,
            used_bytes,
            usage_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Throughput {
    pub read_mbps: Option<f64>,
    pub write_mbps: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iops {
    pub read_iops: Option<f64>,
    pub write_iops: Option<f64>,
}

impl Iops {
    /// Sum of both directions; None unless both were measured.
    pub fn total(&self) -> Option<f64> {
        Some(round2(self.read_iops? + self.write_iops?))
    }
}

/// Composite NAS sample, one per NAS poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NasMetric {
    pub created_at: u64,
    pub available: bool,
    pub capacity: Option<Capacity>,
    pub status: CapacityStatus,
    pub latency_ms: Option<f64>,
    pub throughput: Throughput,
    pub iops: Iops,
    pub total_iops: Option<f64>,
    pub file_count: Option<u64>,
    pub concurrent_users: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub name: String,
    pub status: String,
    pub finished_at: u64,
    pub size_bytes: u64,
}

/// Aggregated health report for GET /nas/health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NasHealth {
    pub checked_at: u64,
    pub share_name: String,
    pub mount_point: String,
    pub available: bool,
    pub mounted: bool,
    pub writable: bool,
    pub capacity: Option<Capacity>,
    pub status: CapacityStatus,
    pub color: String,
    pub latency_ms: Option<f64>,
    pub last_backup: Option<BackupSummary>,
    pub warnings: Vec<String>,
}

/// Result of the cheap availability + latency + writability check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTest {
    pub available: bool,
    pub latency_ms: Option<f64>,
    pub writable: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTest {
    pub writable: bool,
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rolling-period summary of persisted NAS metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NasStats {
    pub period: String,
    pub since: u64,
    pub samples: u64,
    pub availability_percent: f64,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub avg_read_mbps: Option<f64>,
    pub avg_write_mbps: Option<f64>,
    pub avg_total_iops: Option<f64>,
    pub avg_usage_percent: Option<f64>,
    pub max_usage_percent: Option<f64>,
    pub avg_concurrent_users: f64,
    pub max_concurrent_users: u64,
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
