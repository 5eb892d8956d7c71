// Start / poll / stop protocol over cumulative counters.
//
// One PollingSession (the "previous" snapshot) per DeltaSession. Polls are serialized by
// try_lock: a second concurrent poll is rejected with AlreadyPolling instead of racing
// on the stored baseline.

pub mod delta;

use crate::counters::CounterReader;
use crate::error::MetricsError;
use crate::host::HostRepo;
use crate::models::{DeltaMetric, HostVitals, MetricRecord, Snapshot};
use crate::probes::LatencyProbe;
use crate::store::MetricStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

/// Cumulative count of handled HTTP requests (application-level request rate).
#[derive(Debug, Clone, Default)]
pub struct RequestCounter(Arc<AtomicU64>);

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Collaborators and limits for a DeltaSession.
pub struct SessionDeps {
    pub reader: Arc<dyn CounterReader>,
    pub host: Arc<HostRepo>,
    pub store: Arc<MetricStore>,
    pub requests: RequestCounter,
    pub latency: LatencyProbe,
    /// Echo target for the snapshot latency field; None skips the echo.
    pub latency_target: Option<String>,
    /// Deadline for each suspending call (sample, store write, vitals).
    pub timeout: Duration,
}

struct PollingSession {
    previous: Snapshot,
    previous_requests: u64,
    last_delta: Option<DeltaMetric>,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    pub current: Snapshot,
    pub delta: DeltaMetric,
    /// True when elapsed time was not positive and `delta` is the previous one held steady.
    pub held: bool,
}

pub struct DeltaSession {
    deps: SessionDeps,
    state: Mutex<Option<PollingSession>>,
}

impl DeltaSession {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            state: Mutex::new(None),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Take the baseline sample and enter Active. Restarting an active session re-baselines it.
    #[instrument(skip(self), fields(component = "session", operation = "start"))]
    pub async fn start(&self) -> Result<Snapshot, MetricsError> {
        let mut state = self.state.lock().await;
        let baseline = self.sample().await?;
        if state.is_some() {
            tracing::debug!("session already active, re-baselining");
        }
        *state = Some(PollingSession {
            previous: baseline.clone(),
            previous_requests: self.deps.requests.total(),
            last_delta: None,
        });
        tracing::info!(
            reader = self.deps.reader.name(),
            captured_at = baseline.captured_at,
            "metrics session started"
        );
        Ok(baseline)
    }

    /// Sample, difference against the previous snapshot, persist, and advance the baseline.
    ///
    /// `hint` replaces the stored previous snapshot; without a session it allows a stateless
    /// poll (nothing is stored for the next call). Hinted polls report a request rate of 0.
    #[instrument(skip(self, hint), fields(component = "session", operation = "poll", hinted = hint.is_some()))]
    pub async fn poll(&self, hint: Option<Snapshot>) -> Result<PollOutcome, MetricsError> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| MetricsError::AlreadyPolling)?;
        // The request count has no value at a caller-supplied baseline, so a hinted poll
        // reports no request rate rather than one over a different interval
        let (previous, previous_requests, last_delta) = match (state.as_ref(), hint) {
            (Some(s), Some(hint)) => (hint, None, s.last_delta.clone()),
            (Some(s), None) => (
                s.previous.clone(),
                Some(s.previous_requests),
                s.last_delta.clone(),
            ),
            (None, Some(hint)) => (hint, None, None),
            (None, None) => return Err(MetricsError::SessionNotActive),
        };

        let current = self.sample().await?;
        let requests_now = self.deps.requests.total();

        let Some(delta) = delta::compute(&previous, &current) else {
            tracing::warn!(
                previous_at = previous.captured_at,
                current_at = current.captured_at,
                "non-positive elapsed time, holding previous delta"
            );
            // Clock moved backwards: later samples must be measured from the new reading
            if current.captured_at < previous.captured_at
                && let Some(s) = state.as_mut()
            {
                s.previous = current.clone();
                s.previous_requests = requests_now;
            }
            let held = last_delta.unwrap_or_else(|| DeltaMetric::zero(&current));
            return Ok(PollOutcome {
                current,
                delta: held,
                held: true,
            });
        };

        let requests_per_sec = previous_requests
            .map(|prev| delta::rate_per_sec(prev, requests_now, delta.elapsed_secs))
            .unwrap_or(0.0);
        let record = MetricRecord {
            created_at: current.captured_at,
            delta: delta.clone(),
            vitals: self.vitals().await,
            requests_per_sec,
            snapshot: current.clone(),
        };
        tokio::time::timeout(self.deps.timeout, self.deps.store.save_metric_record(&record))
            .await
            .map_err(|_| MetricsError::Timeout("metric record save"))??;

        if let Some(s) = state.as_mut() {
            s.previous = current.clone();
            s.previous_requests = requests_now;
            s.last_delta = Some(delta.clone());
        }
        if current.is_degraded() {
            tracing::warn!(degraded = ?current.degraded, "poll completed with degraded counters");
        }
        Ok(PollOutcome {
            current,
            delta,
            held: false,
        })
    }

    /// Clear the session. Polls fail with SessionNotActive until the next start.
    #[instrument(skip(self), fields(component = "session", operation = "stop"))]
    pub async fn stop(&self) -> Result<(), MetricsError> {
        let mut state = self.state.lock().await;
        match state.take() {
            Some(_) => {
                tracing::info!("metrics session stopped");
                Ok(())
            }
            None => Err(MetricsError::SessionNotActive),
        }
    }

    async fn sample(&self) -> Result<Snapshot, MetricsError> {
        let reader = self.deps.reader.clone();
        let task = tokio::task::spawn_blocking(move || reader.sample());
        let mut snapshot = match tokio::time::timeout(self.deps.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                return Err(MetricsError::QueryFailure(format!(
                    "counter task join: {}",
                    e
                )));
            }
            Err(_) => return Err(MetricsError::Timeout("counter sample")),
        };
        if let Some(target) = self.deps.latency_target.as_deref() {
            snapshot.latency_ms = self.deps.latency.ping(target).await;
        }
        Ok(snapshot)
    }

    async fn vitals(&self) -> HostVitals {
        match tokio::time::timeout(self.deps.timeout, self.deps.host.vitals()).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, operation = "vitals", "host vitals failed");
                HostVitals::default()
            }
            Err(_) => {
                tracing::warn!(operation = "vitals", "host vitals timed out");
                HostVitals::default()
            }
        }
    }
}
