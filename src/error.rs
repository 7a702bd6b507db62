//! Domain error taxonomy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Duplicate start for a stream that is already live.
    #[error("stream is already live")]
    StateConflict,

    /// Operation on a stream that does not exist or has ended.
    #[error("stream not active")]
    NotActive,

    /// A stream room has reached its subscriber ceiling.
    #[error("room capacity exceeded")]
    CapacityExceeded,

    /// The persistent store is currently unreachable.
    #[error("store connection error")]
    ConnectionError,

    /// The persistent store gave up reconnecting; hard failure.
    #[error("store unavailable")]
    Unavailable,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable code carried in WebSocket `Error` frames and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::StateConflict => "state-conflict",
            AppError::NotActive => "not-active",
            AppError::CapacityExceeded => "capacity-exceeded",
            AppError::ConnectionError => "connection-error",
            AppError::Unavailable => "unavailable",
            AppError::Validation(_) => "validation-failure",
            AppError::Io(_) => "io-error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::StateConflict => StatusCode::CONFLICT,
            AppError::NotActive => StatusCode::NOT_FOUND,
            AppError::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::ConnectionError | AppError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}
