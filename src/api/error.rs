use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::service::{ControlError, QueryError};

/// Error side of every handler, rendered as `{"error": ...}` JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Query(#[from] QueryError),

    #[error("{0}")]
    Control(#[from] ControlError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Query(QueryError::Stale(_)) => StatusCode::NOT_FOUND,
            ApiError::Query(QueryError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Control(ControlError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Control(ControlError::InvalidCommand(_)) => StatusCode::BAD_REQUEST,
            ApiError::Control(ControlError::PublishFailed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, "request failed: {}", self);
        }
        let body = match &self {
            ApiError::Control(ControlError::PublishFailed(_)) => {
                json!({ "success": false, "error": self.to_string() })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
