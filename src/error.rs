use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;

use crate::{auth::AuthTokenError, repository::StoreError};

/// ApiError
///
/// The single error taxonomy surfaced by the API. Every component returns a
/// typed failure that converts into exactly one of these variants, and the
/// `IntoResponse` implementation below performs the one and only mapping step
/// from variant to HTTP status plus the generic `{"error": "<message>"}`
/// envelope. Internal causes are logged, never sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, malformed, expired, or otherwise invalid credentials (401).
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated, but neither the owner nor of sufficient role (403).
    #[error("forbidden")]
    Forbidden,

    /// Admission control rejected the request (429). Carries the time left
    /// until the next window boundary, surfaced via the Retry-After header.
    #[error("rate limit exceeded, retry later")]
    RateLimited { retry_after: Duration },

    /// Version mismatch, duplicate follow edge, or duplicate identity fields (409).
    #[error("resource already exists")]
    Conflict,

    /// Missing resource, or a consumed/expired invitation token (404).
    #[error("resource not found")]
    NotFound,

    /// Malformed or out-of-bounds input (400). The message is safe to expose.
    #[error("{0}")]
    Validation(String),

    /// Unexpected failure (500). The cause is logged inside the request span
    /// (which carries method and path) and replaced by a generic message.
    #[error("the server encountered a problem")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 5xx causes are logged here, within the request's tracing span, so
        // the emitted event already carries the method, uri and request id.
        match &self {
            ApiError::Internal(cause) => {
                tracing::error!(cause = %cause, "internal server error");
            }
            other => {
                tracing::warn!(status = %status, error = %other, "request rejected");
            }
        }

        let body = Json(json!({ "error": self.to_string() }));

        match self {
            ApiError::RateLimited { retry_after } => {
                // Retry-After is expressed in whole seconds and must be
                // positive; a sub-second remainder rounds up, otherwise a
                // compliant client retries inside the same window.
                let secs = retry_after.as_millis().div_ceil(1000).max(1);
                (status, [(header::RETRY_AFTER, secs.to_string())], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}


impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Conflict => ApiError::Conflict,
            StoreError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AuthTokenError> for ApiError {
    // Every token failure class collapses to 401; the distinction only
    // matters for logging and tests, never for the client-facing status.
    fn from(_: AuthTokenError) -> Self {
        ApiError::Unauthorized
    }
}
