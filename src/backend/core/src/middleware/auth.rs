//! Credential presence check.
//!
//! Only verifies that an `Authorization` header is present and non-blank.
//! Validating the credential is left to the backend.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use tracing::warn;

use super::pipeline::{Filter, Next};
use crate::error::{FilterError, Result};

/// Runs right after the trace context filter.
pub const AUTH_PRIORITY: i32 = -50;

/// Rejects requests without credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthFilter;

/// Whether the request carries a non-blank `Authorization` header.
pub fn has_credentials(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .is_some_and(|value| !value.as_bytes().iter().all(u8::is_ascii_whitespace))
}

#[async_trait]
impl Filter for AuthFilter {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn priority(&self) -> i32 {
        AUTH_PRIORITY
    }

    async fn apply(&self, request: Request<Body>, next: Next) -> Result<Response> {
        if !has_credentials(request.headers()) {
            warn!(path = %request.uri().path(), "Request without Authorization header");
            return Err(FilterError::MissingCredentials);
        }

        next.run(request).await
    }
}
