//! Gateway error types with wire-code and HTTP status mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a machine-readable wire code (shared by both transports) and a
//! specific HTTP status code for the stateless path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": "tool_not_found",
///     "message": "tool not found: weather",
///     "data": null
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code (see [`GatewayError::wire_code`]).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Server-side error enum with wire-code and HTTP status mapping.
///
/// The set of codes is closed: anything a handler or tool raises is
/// normalized into one of these variants before it reaches a client.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Inbound frame could not be parsed as an envelope.
    #[error("invalid message: {0}")]
    ParseError(String),

    /// Request was well-formed JSON but semantically invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler registered for the requested method.
    #[error("unknown method: {0}")]
    MethodNotFound(String),

    /// Tool input failed schema validation. The message concatenates
    /// every individual violation.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// No tool registered under the requested name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Caller could not be authenticated.
    #[error("{0}")]
    AuthenticationFailed(String),

    /// Caller is authenticated but not permitted to perform the action.
    #[error("not authorized: {0}")]
    AuthorizationFailed(String),

    /// Session quota would be exceeded by the requested operation.
    #[error("quota exceeded: {used} of {limit} units used")]
    QuotaExceeded {
        /// Units consumed so far in the current window.
        used: u64,
        /// Maximum units for the current window.
        limit: u64,
    },

    /// Client exceeded rate limit.
    #[error("rate limit exceeded; retry after {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds until the client may retry.
        retry_after_ms: u64,
    },

    /// An upstream collaborator a tool depends on failed.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the machine-readable wire code for this variant.
    ///
    /// These strings appear verbatim in error envelopes on both the
    /// WebSocket and HTTP transports.
    #[must_use]
    pub const fn wire_code(&self) -> &'static str {
        match self {
            Self::ParseError(_) => "invalid_message",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MethodNotFound(_) => "unknown_method",
            Self::ValidationFailed(_) => "validation_failed",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::AuthenticationFailed(_) => "not_authenticated",
            Self::AuthorizationFailed(_) => "not_authorized",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamFailure(_) => "upstream_failure",
            Self::PersistenceError(_) => "persistence_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ParseError(_) | Self::InvalidRequest(_) | Self::ValidationFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MethodNotFound(_) | Self::ToolNotFound(_) => StatusCode::NOT_FOUND,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            Self::QuotaExceeded { .. } | Self::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if a client may retry the failed request as-is.
    ///
    /// Retryability is a pure function of the HTTP status class, see
    /// [`is_retryable_status`].
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        is_retryable_status(self.status_code().as_u16())
    }

    /// Returns the error body serialized for an error envelope.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.wire_code().to_string(),
            message: self.to_string(),
            data: None,
        }
    }
}

/// Returns `true` if the given HTTP status is worth retrying.
///
/// Timeouts, rate limits and transient server-side failures are retryable;
/// every 4xx that indicates a caller mistake is not.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_body(),
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
