//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::core::errors::VoxError;

/// Error returned by HTTP handlers as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Human-readable reason.
    pub message: String,
}

impl ApiError {
    /// Build an error response.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<VoxError> for ApiError {
    fn from(err: VoxError) -> Self {
        let status = match &err {
            VoxError::InvalidRating(_) | VoxError::InvalidData(_) => StatusCode::BAD_REQUEST,
            VoxError::Unauthorized => StatusCode::UNAUTHORIZED,
            VoxError::Forbidden(_) => StatusCode::FORBIDDEN,
            VoxError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            VoxError::AlreadyRated { .. } | VoxError::RoomClosed(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "request failed");
            Self::new(status, "internal error")
        } else {
            Self::new(status, err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
