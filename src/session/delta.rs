// Pure rate computation between two snapshots.

use crate::models::{DeltaMetric, Snapshot, round2};

/// Rates from `previous` to `current`, or None when elapsed time is not positive.
/// A counter that went backwards (reboot, driver reset) reads as 0 for this interval.
pub fn compute(previous: &Snapshot, current: &Snapshot) -> Option<DeltaMetric> {
    if current.captured_at <= previous.captured_at {
        return None;
    }
    let elapsed_secs = (current.captured_at - previous.captured_at) as f64 / 1000.0;

    let pairs = [
        (previous.net_bytes_received, current.net_bytes_received),
        (previous.net_bytes_sent, current.net_bytes_sent),
        (previous.disk_reads, current.disk_reads),
        (previous.disk_writes, current.disk_writes),
    ];
    let counter_reset = pairs.iter().any(|&(prev, curr)| curr < prev);
    if counter_reset {
        tracing::debug!(
            previous_at = previous.captured_at,
            current_at = current.captured_at,
            "cumulative counter went backwards, clamping to 0"
        );
    }
    let [rx, tx, reads, writes] = pairs.map(|(prev, curr)| rate_per_sec(prev, curr, elapsed_secs));

    Some(DeltaMetric {
        elapsed_secs: round2(elapsed_secs),
        net_received_bytes_per_sec: rx,
        net_sent_bytes_per_sec: tx,
        reads_per_sec: reads,
        writes_per_sec: writes,
        disk_free_bytes: current.disk_free_bytes,
        disk_queue_length: current.disk_queue_length,
        latency_ms: current.latency_ms,
        counter_reset,
    })
}

/// Non-negative per-second rate of a cumulative counter, two decimals.
pub fn rate_per_sec(previous: u64, current: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    round2(current.saturating_sub(previous) as f64 / elapsed_secs)
}
