//! A single error type for every handler: the client sees a stable code and
//! a generic message, the cause is logged internally and never leaked.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    InvalidRequest,
    InvalidRange,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    PayloadTooLarge,
    Internal,
    Unavailable,
}

impl ApiErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidRequest | ApiErrorCode::InvalidRange => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct ApiErrorBody {
    code: ApiErrorCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        (
            status,
            Json(ApiErrorBody {
                code: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}

/// Logs a database error with context and returns a generic internal error
/// to the client, never the underlying `sqlx` message.
pub fn db_error(context: &str, err: sqlx::Error) -> ApiError {
    tracing::error!(error = %err, context, "database operation failed");
    ApiError::new(ApiErrorCode::Internal, "internal error")
}

/// Same as `db_error` but for any displayable internal failure, used by the
/// audit query plane where the underlying error may be a migration failure
/// rather than a query failure.
pub fn internal_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, context, "internal operation failed");
    ApiError::new(ApiErrorCode::Internal, "internal error")
}
