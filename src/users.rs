// Concurrent-user estimate: recently active principals, cross-checked against live share sessions.

use crate::host::linux;
use crate::store::MetricStore;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Best-effort count of live remote-share sessions. None when the platform cannot tell.
pub trait ShareSessionCounter: Send + Sync + 'static {
    fn active_sessions(&self) -> Option<u64>;
}

/// Established TCP connections to the local file-share port (/proc/net/tcp{,6}).
pub struct ProcNetShareSessions {
    port: u16,
}

impl ProcNetShareSessions {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl ShareSessionCounter for ProcNetShareSessions {
    fn active_sessions(&self) -> Option<u64> {
        linux::read_tcp_counts(Some(self.port))
            .map(|c| c.established)
            .ok()
    }
}

/// Secondary signal for hosts without a session table.
pub struct NoShareSessions;

impl ShareSessionCounter for NoShareSessions {
    fn active_sessions(&self) -> Option<u64> {
        None
    }
}

/// Fixed session count; for tests and for deployments that learn it elsewhere.
pub struct FixedShareSessions(pub Option<u64>);

impl ShareSessionCounter for FixedShareSessions {
    fn active_sessions(&self) -> Option<u64> {
        self.0
    }
}

/// Select the session source once at startup.
pub fn detect_share_sessions(port: u16) -> Arc<dyn ShareSessionCounter> {
    if cfg!(target_os = "linux") && std::path::Path::new("/proc/net/tcp").exists() {
        Arc::new(ProcNetShareSessions::new(port))
    } else {
        Arc::new(NoShareSessions)
    }
}

/// Single-value cache with a fixed time-to-live. Process-local, owned by its component.
#[derive(Debug)]
pub struct TtlCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, u64)>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Option<u64> {
        let guard = self.slot.lock().ok()?;
        match *guard {
            Some((at, value)) if at.elapsed() < self.ttl => Some(value),
            _ => None,
        }
    }

    pub fn put(&self, value: u64) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = Some((Instant::now(), value));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }
}

pub struct ConcurrentUserEstimator {
    store: Arc<MetricStore>,
    sessions: Arc<dyn ShareSessionCounter>,
    window: Duration,
    cache: TtlCache,
    /// Deadline for the activity query and the share session count.
    timeout: Duration,
}

impl ConcurrentUserEstimator {
    pub fn new(
        store: Arc<MetricStore>,
        sessions: Arc<dyn ShareSessionCounter>,
        window: Duration,
        cache: TtlCache,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            window,
            cache,
            timeout,
        }
    }

    /// max(active principals in the window, share sessions). Both are lower bounds on the truth.
    /// A failed store query counts as 0 so the estimate never fails a report.
    #[instrument(skip(self), fields(component = "users", operation = "estimate"))]
    pub async fn estimate(&self) -> u64 {
        if let Some(cached) = self.cache.get() {
            return cached;
        }
        let since = crate::counters::now_ms() as i64 - self.window.as_millis() as i64;
        let active = match tokio::time::timeout(
            self.timeout,
            self.store.count_active_users_since(since),
        )
        .await
        {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, operation = "count_active_users_since", "user activity query failed");
                0
            }
            Err(_) => {
                tracing::warn!(
                    operation = "count_active_users_since",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "user activity query timed out"
                );
                0
            }
        };
        let sessions = self.sessions.clone();
        let share = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || sessions.active_sessions()),
        )
        .await
        .ok()
        .and_then(|joined| joined.ok())
        .flatten();
        let estimate = share.map_or(active, |s| s.max(active));
        tracing::debug!(active, share_sessions = ?share, estimate, "concurrent users estimated");
        self.cache.put(estimate);
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_cache_expires() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(), None);
        cache.put(4);
        assert_eq!(cache.get(), Some(4));
        cache.clear();
        assert_eq!(cache.get(), None);

        let zero = TtlCache::new(Duration::ZERO);
        zero.put(4);
        assert_eq!(zero.get(), None);
    }

    #[test]
    fn fixed_sessions_report_value() {
        assert_eq!(FixedShareSessions(Some(5)).active_sessions(), Some(5));
        assert_eq!(NoShareSessions.active_sessions(), None);
    }
}
