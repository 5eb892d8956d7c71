// Sampling/session errors and their HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The counter-query mechanism does not exist on this host.
    #[error("performance counters unsupported on this platform: {0}")]
    PlatformUnsupported(String),
    /// The counter-query channel itself failed.
    #[error("counter query failed: {0}")]
    QueryFailure(String),
    #[error("no active metrics session; call start first")]
    SessionNotActive,
    #[error("a poll is already in progress for this session")]
    AlreadyPolling,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("metric store: {0}")]
    Store(#[from] anyhow::Error),
}

impl MetricsError {
    pub fn status(&self) -> StatusCode {
        match self {
            MetricsError::PlatformUnsupported(_) => StatusCode::NOT_IMPLEMENTED,
            MetricsError::QueryFailure(_) => StatusCode::BAD_GATEWAY,
            MetricsError::SessionNotActive | MetricsError::AlreadyPolling => StatusCode::CONFLICT,
            MetricsError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            MetricsError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MetricsError::PlatformUnsupported(_) => "platform_unsupported",
            MetricsError::QueryFailure(_) => "query_failure",
            MetricsError::SessionNotActive => "session_not_active",
            MetricsError::AlreadyPolling => "already_polling",
            MetricsError::Timeout(_) => "timeout",
            MetricsError::Store(_) => "store_error",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Request-level rejection for handlers that never touch the session.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Internal(e) => {
                tracing::warn!(error = %e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    e.to_string(),
                )
            }
        };
        let body = ErrorBody {
            error: error.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
