//! The one place internal error kinds become HTTP responses.
//!
//! Handlers return `Result<_, ApiError>`; every component error converts
//! into a variant here, and `IntoResponse` owns the status mapping, the
//! `Retry-After` headers, and the rule that 401 bodies are generic and 500
//! bodies leak nothing.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    /// Missing, unknown or inactive key. Always the same generic body.
    Unauthorized,
    RateLimited { retry_after_secs: u64 },
    Validation { field: String, reason: String },
    Parse(String),
    QueueFull,
    NotFound,
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response(),

            ApiError::RateLimited { retry_after_secs } => {
                let mut resp = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": "rate_limited", "retry_after": retry_after_secs})),
                )
                    .into_response();
                resp.headers_mut()
                    .insert(RETRY_AFTER, retry_after_header(retry_after_secs));
                resp
            }

            ApiError::Validation { field, reason } => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "validation_error", "field": field, "reason": reason})),
            )
                .into_response(),

            ApiError::Parse(reason) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "parse_error", "reason": reason})),
            )
                .into_response(),

            ApiError::QueueFull => {
                let mut resp = (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": "queue_full"})),
                )
                    .into_response();
                resp.headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from_static("1"));
                resp
            }

            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response()
            }

            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal"})),
                )
                    .into_response()
            }
        }
    }
}

fn retry_after_header(secs: u64) -> HeaderValue {
    HeaderValue::from_str(&secs.to_string()).unwrap_or_else(|_| HeaderValue::from_static("1"))
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<fl_ingest::ParseError> for ApiError {
    fn from(err: fl_ingest::ParseError) -> Self {
        ApiError::Parse(err.to_string())
    }
}

impl From<fl_ingest::ValidationError> for ApiError {
    fn from(err: fl_ingest::ValidationError) -> Self {
        ApiError::Validation {
            field: err.field.to_string(),
            reason: err.reason,
        }
    }
}

impl From<fl_batcher::SubmitError> for ApiError {
    fn from(err: fl_batcher::SubmitError) -> Self {
        // Both buffer overflow and a draining intake read as "retry shortly".
        match err {
            fl_batcher::SubmitError::QueueFull | fl_batcher::SubmitError::ShuttingDown => {
                ApiError::QueueFull
            }
        }
    }
}
