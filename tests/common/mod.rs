// Shared test helpers
#![allow(dead_code)]

use nasmon::counters::fake::ScriptedCounterReader;
use nasmon::host::HostRepo;
use nasmon::nas::{NasDeps, NasMonitor};
use nasmon::probes::{CapacityProbe, LatencyProbe, StorageIoProbe};
use nasmon::session::{DeltaSession, RequestCounter, SessionDeps};
use nasmon::store::MetricStore;
use nasmon::users::{ConcurrentUserEstimator, FixedShareSessions, TtlCache};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Fresh SQLite store in a temp dir; keep the TempDir alive for the test's duration.
pub async fn temp_store() -> (TempDir, Arc<MetricStore>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let store = MetricStore::connect(path.to_str().unwrap(), 2, 30)
        .await
        .unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

pub fn scripted_session(
    store: Arc<MetricStore>,
    reader: Arc<ScriptedCounterReader>,
    requests: RequestCounter,
) -> DeltaSession {
    DeltaSession::new(SessionDeps {
        reader,
        host: Arc::new(HostRepo::new()),
        store,
        requests,
        latency: LatencyProbe::new(Duration::from_millis(500)),
        latency_target: None,
        timeout: TIMEOUT,
    })
}

pub fn estimator(store: Arc<MetricStore>, share_sessions: Option<u64>) -> ConcurrentUserEstimator {
    ConcurrentUserEstimator::new(
        store,
        Arc::new(FixedShareSessions(share_sessions)),
        Duration::from_secs(300),
        TtlCache::new(Duration::from_secs(5)),
        TIMEOUT,
    )
}

fn storage_probe(root: &Path) -> StorageIoProbe {
    StorageIoProbe::new(
        root.to_path_buf(),
        64 * 1024,
        8,
        4096,
        TIMEOUT,
        Duration::from_secs(1),
    )
}

/// NAS monitor over `root` with small probe sizes and no echo target.
/// Any directory counts as the volume; see `mounted_nas_monitor` for the mount check.
pub fn nas_monitor(store: Arc<MetricStore>, root: &Path) -> NasMonitor {
    nas_monitor_with(store, storage_probe(root).allow_unmounted())
}

/// NAS monitor that only probes `root` while it is a mount target.
pub fn mounted_nas_monitor(store: Arc<MetricStore>, root: &Path) -> NasMonitor {
    nas_monitor_with(store, storage_probe(root))
}

fn nas_monitor_with(store: Arc<MetricStore>, storage: StorageIoProbe) -> NasMonitor {
    NasMonitor::new(NasDeps {
        store: store.clone(),
        users: Arc::new(estimator(store, Some(0))),
        latency: LatencyProbe::new(Duration::from_millis(500)),
        latency_target: None,
        storage,
        capacity: CapacityProbe::new(TIMEOUT),
        share_name: "media".into(),
        file_count_limit: 1000,
        timeout: TIMEOUT,
    })
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
