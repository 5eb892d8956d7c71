// DeltaSession start/poll/stop protocol against scripted counters

mod common;

use nasmon::counters::fake::{ScriptedCounterReader, snapshot};
use nasmon::counters::{CounterReader, UnsupportedCounterReader};
use nasmon::error::MetricsError;
use nasmon::host::HostRepo;
use nasmon::models::Snapshot;
use nasmon::probes::LatencyProbe;
use nasmon::session::{DeltaSession, RequestCounter, SessionDeps};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

fn with_free(mut s: Snapshot, free: u64) -> Snapshot {
    s.disk_free_bytes = free;
    s
}

#[tokio::test]
async fn test_reads_per_sec_after_two_seconds() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        with_free(snapshot(100_000, 5_000, 900, 1_000, 1_000), 500_000_000_000),
        with_free(snapshot(102_000, 5_200, 900, 1_000, 1_000), 499_999_000_000),
    ]));
    let session = common::scripted_session(store.clone(), reader, RequestCounter::new());

    let baseline = session.start().await.unwrap();
    assert_eq!(baseline.disk_free_bytes, 500_000_000_000);

    let outcome = session.poll(None).await.unwrap();
    assert!(!outcome.held);
    assert_eq!(outcome.delta.elapsed_secs, 2.0);
    assert_eq!(outcome.delta.reads_per_sec, 100.0);
    assert_eq!(outcome.delta.writes_per_sec, 0.0);
    assert_eq!(outcome.delta.disk_free_bytes, 499_999_000_000);

    let latest = store.latest_metric_record().await.unwrap().unwrap();
    assert_eq!(latest.created_at, 102_000);
    assert_eq!(latest.delta, outcome.delta);
    assert_eq!(latest.snapshot, outcome.current);
}

#[tokio::test]
async fn test_current_snapshot_becomes_next_baseline() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(0, 0, 0, 0, 0),
        snapshot(1_000, 10, 0, 0, 0),
        snapshot(3_000, 50, 0, 0, 0),
    ]));
    let session = common::scripted_session(store, reader, RequestCounter::new());
    session.start().await.unwrap();
    assert_eq!(session.poll(None).await.unwrap().delta.reads_per_sec, 10.0);
    assert_eq!(session.poll(None).await.unwrap().delta.reads_per_sec, 20.0);
}

#[tokio::test]
async fn test_zero_elapsed_holds_without_error() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(50_000, 10, 10, 10, 10),
        snapshot(50_000, 90, 90, 90, 90),
    ]));
    let session = common::scripted_session(store.clone(), reader, RequestCounter::new());
    session.start().await.unwrap();

    let outcome = session.poll(None).await.unwrap();
    assert!(outcome.held);
    assert_eq!(outcome.delta.reads_per_sec, 0.0);
    assert_eq!(outcome.delta.elapsed_secs, 0.0);
    assert!(store.latest_metric_record().await.unwrap().is_none());
}

#[tokio::test]
async fn test_zero_elapsed_repeats_previous_delta() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(0, 0, 0, 0, 0),
        snapshot(2_000, 100, 0, 0, 0),
        snapshot(2_000, 500, 0, 0, 0),
        snapshot(4_000, 300, 0, 0, 0),
    ]));
    let session = common::scripted_session(store, reader, RequestCounter::new());
    session.start().await.unwrap();

    let first = session.poll(None).await.unwrap();
    let held = session.poll(None).await.unwrap();
    assert!(held.held);
    assert_eq!(held.delta, first.delta);

    // Baseline stayed at t=2000
    let next = session.poll(None).await.unwrap();
    assert!(!next.held);
    assert_eq!(next.delta.reads_per_sec, 100.0);
}

#[tokio::test]
async fn test_backwards_clock_rebaselines() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(10_000, 0, 0, 0, 0),
        snapshot(9_000, 40, 0, 0, 0),
        snapshot(11_000, 80, 0, 0, 0),
    ]));
    let session = common::scripted_session(store, reader, RequestCounter::new());
    session.start().await.unwrap();

    assert!(session.poll(None).await.unwrap().held);
    let after = session.poll(None).await.unwrap();
    assert!(!after.held);
    assert_eq!(after.delta.elapsed_secs, 2.0);
    assert_eq!(after.delta.reads_per_sec, 20.0);
}

#[tokio::test]
async fn test_counter_reset_clamps_to_zero() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(0, 1_000_000, 1_000_000, 1 << 40, 1 << 40),
        snapshot(1_000, 10, 10, 100, 100),
        snapshot(2_000, 20, 30, 100, 100),
    ]));
    let session = common::scripted_session(store, reader, RequestCounter::new());
    session.start().await.unwrap();

    let reset = session.poll(None).await.unwrap();
    assert!(reset.delta.counter_reset);
    assert_eq!(reset.delta.reads_per_sec, 0.0);
    assert_eq!(reset.delta.net_received_bytes_per_sec, 0.0);

    let recovered = session.poll(None).await.unwrap();
    assert!(!recovered.delta.counter_reset);
    assert_eq!(recovered.delta.reads_per_sec, 10.0);
    assert_eq!(recovered.delta.writes_per_sec, 20.0);
}

#[tokio::test]
async fn test_stop_then_poll_is_session_not_active() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(0, 0, 0, 0, 0),
        snapshot(1_000, 1, 1, 1, 1),
    ]));
    let session = common::scripted_session(store, reader.clone(), RequestCounter::new());
    session.start().await.unwrap();
    assert!(session.is_active().await);
    session.stop().await.unwrap();
    assert!(!session.is_active().await);

    let err = session.poll(None).await.unwrap_err();
    assert!(matches!(err, MetricsError::SessionNotActive));
    // Rejected before sampling
    assert_eq!(reader.remaining(), 1);
    assert!(matches!(
        session.stop().await.unwrap_err(),
        MetricsError::SessionNotActive
    ));
}

#[tokio::test]
async fn test_poll_without_start_is_session_not_active() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([snapshot(0, 0, 0, 0, 0)]));
    let session = common::scripted_session(store, reader, RequestCounter::new());
    assert!(matches!(
        session.poll(None).await.unwrap_err(),
        MetricsError::SessionNotActive
    ));
}

#[tokio::test]
async fn test_stateless_poll_with_previous_hint() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([snapshot(
        6_000, 700, 300, 0, 0,
    )]));
    let session = common::scripted_session(store.clone(), reader, RequestCounter::new());

    let previous = snapshot(2_000, 300, 100, 0, 0);
    let outcome = session.poll(Some(previous)).await.unwrap();
    assert_eq!(outcome.delta.reads_per_sec, 100.0);
    assert_eq!(outcome.delta.writes_per_sec, 50.0);
    assert!(!session.is_active().await);
    assert!(store.latest_metric_record().await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_sample_keeps_baseline() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([snapshot(0, 0, 0, 0, 0)]));
    let session = common::scripted_session(store, reader.clone(), RequestCounter::new());
    session.start().await.unwrap();

    assert!(matches!(
        session.poll(None).await.unwrap_err(),
        MetricsError::QueryFailure(_)
    ));
    assert!(session.is_active().await);

    reader.push(snapshot(4_000, 40, 0, 0, 0));
    assert_eq!(session.poll(None).await.unwrap().delta.reads_per_sec, 10.0);
}

#[tokio::test]
async fn test_request_rate_is_differenced() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(0, 0, 0, 0, 0),
        snapshot(2_000, 0, 0, 0, 0),
    ]));
    let requests = RequestCounter::new();
    let session = common::scripted_session(store.clone(), reader, requests.clone());
    session.start().await.unwrap();
    for _ in 0..10 {
        requests.increment();
    }
    session.poll(None).await.unwrap();

    let latest = store.latest_metric_record().await.unwrap().unwrap();
    assert_eq!(latest.requests_per_sec, 5.0);
}

#[tokio::test]
async fn test_hinted_poll_has_no_request_rate_then_session_resumes() {
    let (_dir, store) = common::temp_store().await;
    let reader = Arc::new(ScriptedCounterReader::new([
        snapshot(0, 0, 0, 0, 0),
        snapshot(10_000, 1_000, 0, 0, 0),
        snapshot(12_000, 1_000, 0, 0, 0),
    ]));
    let requests = RequestCounter::new();
    let session = common::scripted_session(store.clone(), reader, requests.clone());
    session.start().await.unwrap();
    for _ in 0..40 {
        requests.increment();
    }

    // Hint covers 8 s while the session counter covers 10 s
    let outcome = session
        .poll(Some(snapshot(2_000, 200, 0, 0, 0)))
        .await
        .unwrap();
    assert_eq!(outcome.delta.reads_per_sec, 100.0);
    let latest = store.latest_metric_record().await.unwrap().unwrap();
    assert_eq!(latest.requests_per_sec, 0.0);

    for _ in 0..6 {
        requests.increment();
    }
    session.poll(None).await.unwrap();
    let latest = store.latest_metric_record().await.unwrap().unwrap();
    assert_eq!(latest.created_at, 12_000);
    assert_eq!(latest.requests_per_sec, 3.0);
}

#[tokio::test]
async fn test_unsupported_platform_is_distinct_error() {
    let (_dir, store) = common::temp_store().await;
    let session = DeltaSession::new(SessionDeps {
        reader: Arc::new(UnsupportedCounterReader::new("no counters here")),
        host: Arc::new(HostRepo::new()),
        store,
        requests: RequestCounter::new(),
        latency: LatencyProbe::new(Duration::from_millis(500)),
        latency_target: None,
        timeout: common::TIMEOUT,
    });
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, MetricsError::PlatformUnsupported(_)));
    assert!(!session.is_active().await);
}

/// Blocks each sample until the test releases a permit.
struct GatedReader {
    permits: Mutex<mpsc::Receiver<()>>,
    waiting: AtomicBool,
    inner: ScriptedCounterReader,
}

impl CounterReader for GatedReader {
    fn sample(&self) -> Result<Snapshot, MetricsError> {
        self.waiting.store(true, Ordering::SeqCst);
        if let Ok(rx) = self.permits.lock() {
            let _ = rx.recv_timeout(Duration::from_secs(3));
        }
        self.waiting.store(false, Ordering::SeqCst);
        self.inner.sample()
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_poll_is_rejected() {
    let (_dir, store) = common::temp_store().await;
    let (permit_tx, permit_rx) = mpsc::channel();
    let reader = Arc::new(GatedReader {
        permits: Mutex::new(permit_rx),
        waiting: AtomicBool::new(false),
        inner: ScriptedCounterReader::new([snapshot(0, 0, 0, 0, 0), snapshot(1_000, 10, 0, 0, 0)]),
    });
    let session = Arc::new(DeltaSession::new(SessionDeps {
        reader: reader.clone(),
        host: Arc::new(HostRepo::new()),
        store,
        requests: RequestCounter::new(),
        latency: LatencyProbe::new(Duration::from_millis(500)),
        latency_target: None,
        timeout: common::TIMEOUT,
    }));

    permit_tx.send(()).unwrap();
    session.start().await.unwrap();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.poll(None).await }
    });
    while !reader.waiting.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = session.poll(None).await.unwrap_err();
    assert!(matches!(second, MetricsError::AlreadyPolling));

    permit_tx.send(()).unwrap();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.delta.reads_per_sec, 10.0);
}
