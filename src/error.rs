//! Service-level error taxonomy and its HTTP mapping.
//!
//! Every failure surfaced to a caller is one of these variants. The wire
//! envelope is `{error, errorType, timestamp, metadata?}`; user errors are
//! surfaced verbatim, infrastructure errors are sanitized to a generic
//! message with full details logged at the failure site.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::cluster::ClusterError;

/// Typed service error. Maps one-to-one onto the HTTP error envelope.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    User(String),

    #[error("authentication required: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Kubernetes API error: {0}")]
    Kubernetes(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable error type for the envelope.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::User(_) => "USER_ERROR",
            Self::Unauthorized(_) => "AUTH_REQUIRED",
            Self::Forbidden(_) => "AUTH_FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            Self::Kubernetes(_) => "KUBERNETES_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "SYSTEM_ERROR",
        }
    }

    /// HTTP status the variant maps to.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::User(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Kubernetes(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Optional structured metadata attached to the envelope.
    fn metadata(&self) -> Option<Value> {
        match self {
            Self::QuotaExceeded(_) => Some(json!({ "quotaRemaining": 0 })),
            _ => None,
        }
    }
}

impl From<ClusterError> for ServiceError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::ReplicasOutOfRange { .. } => Self::User(err.to_string()),
            ClusterError::Timeout(_) => Self::Timeout(err.to_string()),
            // Full detail is logged where the call failed; callers get a
            // sanitized summary.
            ClusterError::Api(_) | ClusterError::Patch(_) => {
                Self::Kubernetes("cluster request failed".to_string())
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            error!(error = %self, error_type = self.error_type(), "Request failed");
        }

        let mut body = json!({
            "error": self.to_string(),
            "errorType": self.error_type(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(metadata) = self.metadata() {
            body["metadata"] = metadata;
        }

        (self.status_code(), Json(body)).into_response()
    }
}

/// Result alias used by the request handlers.
pub type ApiResult<T> = Result<T, ServiceError>;
