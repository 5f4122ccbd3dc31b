use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::BotError;
use crate::pipeline::UPGRADE_MESSAGE;

/// Errors a handler can hand back to the HTTP client
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or unknown API key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Rendered as `403 { "reply": UPGRADE_MESSAGE }` so widgets can show it inline
    #[error("Plan limit reached")]
    QuotaExceeded,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    #[inline]
    pub fn internal(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl From<BotError> for ApiError {
    #[inline]
    fn from(err: BotError) -> Self {
        match err {
            BotError::InvalidInput(message) => Self::BadRequest(message),
            BotError::NotFound(message) => Self::NotFound(message),
            BotError::QuotaExceeded => Self::QuotaExceeded,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        match self {
            Self::QuotaExceeded => (
                StatusCode::FORBIDDEN,
                Json(json!({ "reply": UPGRADE_MESSAGE })),
            )
                .into_response(),
            Self::Internal(detail) => {
                error!("Request failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}
