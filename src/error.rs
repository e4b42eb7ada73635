use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::AuthError;
use crate::upstream::UpstreamError;

/// Every failure a request can end in. Handlers return this and nothing else.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    /// Same response whether the session is absent or owned by someone else.
    #[error("Session not found")]
    NotFound,
    #[error("Error fetching debug data: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("Internal Server Error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(e) => tracing::error!(error = ?e, "request failed"),
            ApiError::Upstream(e) => tracing::warn!(error = %e, "upstream collaborator failed"),
            other => tracing::debug!(error = %other, "request rejected"),
        }
        (self.status(), Json(json!({ "message": self.to_string() }))).into_response()
    }
}
