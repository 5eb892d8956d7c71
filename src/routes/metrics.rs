// Local-host session protocol and persisted records

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use super::{AppState, HistoryQuery};
use crate::error::{ApiError, MetricsError};
use crate::models::{MetricRecord, Snapshot};
use crate::session::PollOutcome;

#[derive(Debug, Serialize)]
pub(super) struct StartResponse {
    baseline: Snapshot,
}

/// Optional body for POST /metrics/poll; `previous` overrides the session's baseline.
#[derive(Debug, Default, Deserialize)]
pub(super) struct PollRequest {
    #[serde(default)]
    previous: Option<Snapshot>,
}

pub(super) async fn start(
    State(state): State<AppState>,
) -> Result<Json<StartResponse>, MetricsError> {
    let baseline = state.session.start().await?;
    Ok(Json(StartResponse { baseline }))
}

pub(super) async fn poll(
    State(state): State<AppState>,
    body: Option<Json<PollRequest>>,
) -> Result<Json<PollOutcome>, MetricsError> {
    let hint = body.and_then(|Json(req)| req.previous);
    Ok(Json(state.session.poll(hint).await?))
}

pub(super) async fn stop(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, MetricsError> {
    state.session.stop().await?;
    Ok(Json(serde_json::json!({ "stopped": true })))
}

pub(super) async fn latest(
    State(state): State<AppState>,
) -> Result<Json<MetricRecord>, ApiError> {
    state
        .store
        .latest_metric_record()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no metric records yet".into()))
}

pub(super) async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MetricRecord>>, ApiError> {
    let (from, to, limit) = query.window()?;
    Ok(Json(state.store.metric_history(from, to, limit).await?))
}
