// Scripted counter source for tests and demos.

use super::CounterReader;
use crate::error::MetricsError;
use crate::models::Snapshot;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays queued snapshots in order; fails with `QueryFailure` once the queue is empty.
#[derive(Default)]
pub struct ScriptedCounterReader {
    queue: Mutex<VecDeque<Snapshot>>,
}

impl ScriptedCounterReader {
    pub fn new(snapshots: impl IntoIterator<Item = Snapshot>) -> Self {
        Self {
            queue: Mutex::new(snapshots.into_iter().collect()),
        }
    }

    pub fn push(&self, snapshot: Snapshot) {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(snapshot);
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl CounterReader for ScriptedCounterReader {
    fn sample(&self) -> Result<Snapshot, MetricsError> {
        let mut q = self
            .queue
            .lock()
            .map_err(|e| MetricsError::QueryFailure(format!("script lock poisoned: {}", e)))?;
        q.pop_front()
            .ok_or_else(|| MetricsError::QueryFailure("counter script exhausted".into()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Snapshot with the given counters and no latency or degradation.
pub fn snapshot(captured_at: u64, reads: u64, writes: u64, rx: u64, tx: u64) -> Snapshot {
    Snapshot {
        captured_at,
        net_bytes_received: rx,
        net_bytes_sent: tx,
        disk_reads: reads,
        disk_writes: writes,
        disk_free_bytes: 0,
        disk_queue_length: 0,
        latency_ms: None,
        degraded: Vec::new(),
    }
}
