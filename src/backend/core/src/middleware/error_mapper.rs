//! Centralized failure rendering.
//!
//! Every request that ends in a [`FilterError`] passes through
//! [`ErrorMapper::render`] exactly once. The mapper classifies the failure by
//! status value, builds the [`GatewayError`] envelope and writes it as JSON.
//! Rendering never fails: if serialization breaks, a fixed literal body is
//! written instead.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use metrics::counter;
use serde::Serialize;
use std::error::Error as _;
use tracing::error;

use super::tracing::{TraceId, TRACE_ID_HEADER};
use crate::error::{ErrorCode, FilterError, GatewayError};

/// Written when the envelope itself cannot be serialized.
pub const FALLBACK_BODY: &str = r#"{"errorCode":"INTERNAL_ERROR"}"#;

/// Converts failures into the client-facing envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorMapper;

impl ErrorMapper {
    /// Resolve the client-facing code for a failure.
    pub fn classify(error: &FilterError) -> ErrorCode {
        match error {
            FilterError::MissingCredentials => ErrorCode::Unauthorized,
            FilterError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            other => ErrorCode::from_status(other.http_status()),
        }
    }

    /// Render `error` as the JSON error response.
    pub fn render(&self, error: &FilterError, trace_id: Option<TraceId>) -> Response {
        let code = Self::classify(error);
        let envelope = GatewayError::new(code, trace_id);

        error!(
            error_code = %code,
            http_status = code.http_status().as_u16(),
            trace_id = envelope.trace_id().map(TraceId::as_str),
            cause = %error,
            source = ?error.source(),
            "Gateway error"
        );
        counter!("gateway_errors_total", "code" => code.as_str()).increment(1);

        envelope_response(&envelope)
    }
}

/// JSON response for an envelope, with status and correlation headers.
pub fn envelope_response(envelope: &GatewayError) -> Response {
    let (status, body) = encode_or_fallback(envelope, envelope.http_status());

    let mut response = json_response(status, body);
    if let Some(value) = envelope.trace_id().and_then(TraceId::header_value) {
        response.headers_mut().insert(TRACE_ID_HEADER.clone(), value);
    }
    if envelope.code() == ErrorCode::RateLimitExceeded {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

/// Serialize `value`, degrading to [`FALLBACK_BODY`] on failure.
pub fn encode_or_fallback<T: Serialize>(value: &T, status: StatusCode) -> (StatusCode, Vec<u8>) {
    match serde_json::to_vec(value) {
        Ok(body) => (status, body),
        Err(e) => {
            error!(error = %e, "Failed to serialize error envelope");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                FALLBACK_BODY.as_bytes().to_vec(),
            )
        }
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
