//! Error types for rimp-ri
//!
//! Two layers:
//! - [`ConnectorError`]: one source failed. Always absorbed by the
//!   aggregator as missing evidence, never shown to clients.
//! - [`ImputeError`]: the request failed. Rendered through [`ApiError`]
//!   with the `{error, message, audit_id}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rimp_common::ErrorKind;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a single connector call
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("Deadline elapsed")]
    Timeout,

    #[error("No record for identity")]
    NotFound,

    #[error("Unusable data: {0}")]
    DataQuality(String),

    #[error("Rejected credentials: {0}")]
    Auth(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Cancelled at request cutoff")]
    Cancelled,

    #[error("Connector crashed: {0}")]
    Internal(String),
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Timeout => ErrorKind::Timeout,
            ConnectorError::NotFound => ErrorKind::NotFound,
            ConnectorError::DataQuality(_) => ErrorKind::DataQuality,
            ConnectorError::Auth(_) => ErrorKind::Auth,
            ConnectorError::Unavailable(_) => ErrorKind::Unavailable,
            ConnectorError::Cancelled => ErrorKind::Cancelled,
            ConnectorError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Request-level failure
///
/// `Clone` because a failed computation is shared with every request
/// waiting on the same idempotency slot.
#[derive(Debug, Clone, Error)]
pub enum ImputeError {
    /// Malformed identity or request body (422)
    #[error("{0}")]
    Validation(String),

    /// Token bucket empty (429)
    #[error("Too many requests")]
    RateLimited,

    /// Missing or unknown bearer token (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Every source failed or timed out (503)
    #[error("No source returned usable evidence")]
    NoEvidence,

    /// Aggregation task crashed; reported as 503 without details
    #[error("Internal failure: {0}")]
    Internal(String),
}

impl ImputeError {
    /// Wire value of the `error` field
    pub fn code(&self) -> &'static str {
        match self {
            ImputeError::Validation(_) => "VALIDATION_ERROR",
            ImputeError::RateLimited => "RATE_LIMITED",
            ImputeError::Unauthorized(_) => "AUTH_ERROR",
            ImputeError::NoEvidence | ImputeError::Internal(_) => "UPSTREAM_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ImputeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ImputeError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ImputeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ImputeError::NoEvidence | ImputeError::Internal(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message safe to show to clients
    pub fn public_message(&self) -> String {
        match self {
            ImputeError::Internal(_) => "Residence sources are temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rimp_common::Error> for ImputeError {
    fn from(err: rimp_common::Error) -> Self {
        match err {
            rimp_common::Error::Validation(msg) => ImputeError::Validation(msg),
            other => ImputeError::Internal(other.to_string()),
        }
    }
}

/// HTTP error response, always carrying an audit id
#[derive(Debug)]
pub struct ApiError {
    pub error: ImputeError,
    pub audit_id: Uuid,
}

impl ApiError {
    pub fn new(error: ImputeError, audit_id: Uuid) -> Self {
        Self { error, audit_id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error.code(),
            "message": self.error.public_message(),
            "audit_id": self.audit_id,
        }));

        (self.error.status(), body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
