//! Error taxonomy for the gateway.
//!
//! Two layers live here:
//!
//! - [`FilterError`]: the typed, status-bearing failure every filter (and the
//!   downstream routing stage) raises to terminate a request early.
//! - [`ErrorCode`] and [`GatewayError`]: the closed client-facing taxonomy and
//!   the JSON envelope rendered exactly once per failing request by
//!   [`ErrorMapper`](crate::middleware::ErrorMapper).
//!
//! Filters never format a response body themselves.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt};
use thiserror::Error;

use crate::middleware::tracing::TraceId;

/// Boxed error accepted from the downstream routing stage.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used by filters and continuations.
pub type Result<T, E = FilterError> = std::result::Result<T, E>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Client-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    DownstreamUnavailable,
    RateLimitExceeded,
    InternalError,
}

impl ErrorCode {
    /// Classify a failure by its HTTP status value.
    pub const fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimitExceeded,
            503 => Self::DownstreamUnavailable,
            _ => Self::InternalError,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::DownstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire name, as it appears in the `errorCode` field.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::DownstreamUnavailable => "DOWNSTREAM_UNAVAILABLE",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Localized client message.
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Authorization required",
            Self::Forbidden => "Access denied",
            Self::DownstreamUnavailable => "Service temporarily unavailable",
            Self::RateLimitExceeded => "Too many requests",
            Self::InternalError => "Internal gateway error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Envelope
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON error envelope returned to clients.
///
/// Immutable once built: `{"errorCode": ..., "message": ..., "traceId": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayError {
    error_code: ErrorCode,
    message: Cow<'static, str>,
    trace_id: Option<TraceId>,
}

impl GatewayError {
    /// Build the envelope for `code` with its fixed message.
    pub fn new(code: ErrorCode, trace_id: Option<TraceId>) -> Self {
        Self {
            error_code: code,
            message: Cow::Borrowed(code.message()),
            trace_id,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.error_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn http_status(&self) -> StatusCode {
        self.error_code.http_status()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Filter Failures
// ═══════════════════════════════════════════════════════════════════════════════

/// Typed failure raised by a filter or by the downstream stage.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Authorization header is missing")]
    MissingCredentials,

    #[error("Rate limit exceeded for client {client_key}")]
    RateLimitExceeded { client_key: String },

    /// Raw status-bearing failure without a more specific variant.
    #[error("Request failed with status {status}: {reason}")]
    Status { status: StatusCode, reason: String },

    #[error("Downstream failure: {0}")]
    Downstream(#[source] BoxError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FilterError {
    /// Create a raw status-bearing failure.
    pub fn status(status: StatusCode, reason: impl Into<String>) -> Self {
        Self::Status {
            status,
            reason: reason.into(),
        }
    }

    /// Create an internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Convert an error coming out of the downstream stage.
    ///
    /// A boxed `FilterError` is unwrapped so it keeps its own status.
    pub fn from_downstream(error: impl Into<BoxError>) -> Self {
        match error.into().downcast::<FilterError>() {
            Ok(typed) => *typed,
            Err(other) => Self::Downstream(other),
        }
    }

    /// HTTP status carried by this failure.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::MissingCredentials => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Status { status, .. } => *status,
            Self::Downstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
