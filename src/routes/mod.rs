// HTTP routes: metrics session, NAS health and NAS metrics

mod http;
mod metrics;
mod nas;

use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ApiError;
use crate::nas::NasMonitor;
use crate::session::{DeltaSession, RequestCounter};
use crate::store::MetricStore;

/// Default history window when `from` is omitted.
const DEFAULT_WINDOW_MS: i64 = 60 * 60 * 1000;
const DEFAULT_HISTORY_LIMIT: u32 = 500;
const MAX_HISTORY_LIMIT: u32 = 5000;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<DeltaSession>,
    pub nas: Arc<NasMonitor>,
    pub store: Arc<MetricStore>,
    pub requests: RequestCounter,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "nasmon: performance metrics service" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/metrics/start", post(metrics::start)) // POST /metrics/start
        .route("/metrics/poll", post(metrics::poll)) // POST /metrics/poll
        .route("/metrics/stop", post(metrics::stop)) // POST /metrics/stop
        .route("/metrics/latest", get(metrics::latest)) // GET /metrics/latest
        .route("/metrics/history", get(metrics::history)) // GET /metrics/history
        .route("/nas/health", get(nas::health)) // GET /nas/health
        .route("/nas/test-write", post(nas::test_write)) // POST /nas/test-write
        .route("/nas/test-connection", post(nas::test_connection)) // POST /nas/test-connection
        .route("/nas-metrics/poll", post(nas::poll)) // POST /nas-metrics/poll
        .route("/nas-metrics/latest", get(nas::latest)) // GET /nas-metrics/latest
        .route("/nas-metrics/history", get(nas::history)) // GET /nas-metrics/history
        .route("/nas-metrics/stats", get(nas::stats)) // GET /nas-metrics/stats
        .layer(middleware::from_fn_with_state(
            state.requests.clone(),
            count_requests,
        ))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

async fn count_requests(
    State(requests): State<RequestCounter>,
    request: Request,
    next: Next,
) -> Response {
    requests.increment();
    next.run(request).await
}

/// `from`/`to` in epoch ms; `to` defaults to now, `from` to one hour before `to`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct HistoryQuery {
    from: Option<i64>,
    to: Option<i64>,
    limit: Option<u32>,
}

impl HistoryQuery {
    pub(crate) fn window(&self) -> Result<(i64, i64, u32), ApiError> {
        let to = match self.to {
            Some(to) => to,
            None => crate::store::now_ms()?,
        };
        let from = self.from.unwrap_or(to - DEFAULT_WINDOW_MS);
        if from >= to {
            return Err(ApiError::BadRequest(format!(
                "from ({}) must be before to ({})",
                from, to
            )));
        }
        let limit = self
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok((from, to, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_window_defaults_to_last_hour() {
        let q = HistoryQuery {
            to: Some(10_000_000),
            ..Default::default()
        };
        assert_eq!(q.window().unwrap(), (10_000_000 - DEFAULT_WINDOW_MS, 10_000_000, 500));
    }

    #[test]
    fn history_limit_is_capped() {
        let q = HistoryQuery {
            from: Some(0),
            to: Some(1),
            limit: Some(1_000_000),
        };
        assert_eq!(q.window().unwrap().2, MAX_HISTORY_LIMIT);
    }

    #[test]
    fn inverted_window_is_rejected() {
        let q = HistoryQuery {
            from: Some(5),
            to: Some(5),
            limit: None,
        };
        assert!(matches!(q.window(), Err(ApiError::BadRequest(_))));
    }
}
