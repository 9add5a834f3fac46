// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthError;
use crate::backend::{BackendError, ConstructionError};

/// Request-boundary error. Every failure a dispatched request can hit ends up here
/// and is rendered through a single response style.
#[derive(Debug, Error)]
pub enum GatewayError {
    // 401 Unauthorized
    #[error("{0}")]
    Authentication(#[from] AuthError),

    // 500 Internal Server Error
    #[error("{0}")]
    Construction(#[from] ConstructionError),

    #[error("invalid request body: {0}")]
    Decode(String),

    #[error("{0}")]
    Operation(#[from] BackendError),

    #[error("failed to encode response: {0}")]
    Encode(String),

    #[error("missing path parameter: {0}")]
    MissingParameter(String),
}

impl GatewayError {
    pub fn decode(err: impl std::fmt::Display) -> Self {
        GatewayError::Decode(err.to_string())
    }

    pub fn encode(err: impl std::fmt::Display) -> Self {
        GatewayError::Encode(err.to_string())
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Construction(_)
            | GatewayError::Decode(_)
            | GatewayError::Operation(_)
            | GatewayError::Encode(_)
            | GatewayError::MissingParameter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) => "UNAUTHORIZED",
            GatewayError::Construction(_) => "BACKEND_UNAVAILABLE",
            GatewayError::Decode(_) => "INVALID_BODY",
            GatewayError::Operation(_) => "OPERATION_FAILED",
            GatewayError::Encode(_) => "ENCODE_FAILED",
            GatewayError::MissingParameter(_) => "MISSING_PARAMETER",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "code": self.error_code(),
            "message": self.to_string(),
        })
    }
}

// Automatic HTTP response conversion for Axum
impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}
