//! Standardized API error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error response carrying the HTTP status and a client-facing message.
///
/// Serialized as `{"code": <http status>, "message": <string>}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    /// 500 with a generic message; the cause is logged, never leaked.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.status.as_u16(),
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Map taxonomy kinds onto HTTP statuses.
impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        match error {
            Error::Validation(message) => Self::bad_request(message),
            Error::NotFound(what) => Self::not_found(format!("{what} not found")),
            Error::Conflict(message) => Self::bad_request(message),
            Error::InvalidTransition { .. } => Self::bad_request(error.to_string()),
            Error::Unauthorized => Self::unauthorized(),
            Error::Payload(message) => Self::bad_request(message),
            Error::Timeout(what) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!("operation timed out: {what}"),
            ),
            Error::Storage { .. } => Self::internal(error),
        }
    }
}
