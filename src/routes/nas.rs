// NAS health, on-demand checks, and persisted NAS metrics

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use super::{AppState, HistoryQuery};
use crate::error::{ApiError, MetricsError};
use crate::models::{ConnectionTest, NasHealth, NasMetric, NasStats, WriteTest};

const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Default, Deserialize)]
pub(super) struct StatsQuery {
    period: Option<String>,
}

/// Rolling period length for a stats query, or None for an unknown period.
pub(super) fn period_ms(period: &str) -> Option<i64> {
    match period {
        "1h" => Some(HOUR_MS),
        "24h" => Some(24 * HOUR_MS),
        "7d" => Some(7 * 24 * HOUR_MS),
        "30d" => Some(30 * 24 * HOUR_MS),
        _ => None,
    }
}

pub(super) async fn health(State(state): State<AppState>) -> Json<NasHealth> {
    Json(state.nas.health().await)
}

pub(super) async fn test_write(State(state): State<AppState>) -> Json<WriteTest> {
    Json(state.nas.test_write().await)
}

pub(super) async fn test_connection(State(state): State<AppState>) -> Json<ConnectionTest> {
    Json(state.nas.test_connection().await)
}

pub(super) async fn poll(State(state): State<AppState>) -> Result<Json<NasMetric>, MetricsError> {
    Ok(Json(state.nas.poll().await?))
}

pub(super) async fn latest(State(state): State<AppState>) -> Result<Json<NasMetric>, ApiError> {
    state
        .store
        .latest_nas_metric()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no nas metrics yet".into()))
}

pub(super) async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<NasMetric>>, ApiError> {
    let (from, to, limit) = query.window()?;
    Ok(Json(state.store.nas_history(from, to, limit).await?))
}

pub(super) async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<NasStats>, ApiError> {
    let period = query.period.as_deref().unwrap_or("24h");
    let Some(length) = period_ms(period) else {
        return Err(ApiError::BadRequest(format!(
            "unknown period {:?}; expected 1h, 24h, 7d or 30d",
            period
        )));
    };
    let since = crate::store::now_ms()? - length;
    Ok(Json(state.store.nas_stats(period, since).await?))
}
