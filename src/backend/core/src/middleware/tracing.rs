//! Request correlation.
//!
//! Features:
//! - `X-Trace-Id` echoed verbatim when supplied, generated otherwise
//! - Trace id attached to the forwarded request, the response and the logs
//! - Task-local ambient context scoped to exactly one request
//! - Completion logging with latency, including cancelled requests

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    future::Future,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
    time::Instant,
};
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::{
    error_mapper::ErrorMapper,
    pipeline::{Filter, Next},
};
use crate::error::Result;

/// Correlation header, read on input and always written on output.
pub static TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

/// Runs before every other filter.
pub const TRACE_PRIORITY: i32 = i32::MIN;

tokio::task_local! {
    static CURRENT_TRACE_ID: TraceId;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Trace Id
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque per-request correlation identifier.
///
/// An inbound id keeps its original header bytes so it is echoed exactly,
/// even when it is not valid UTF-8. The text form is used for logs and the
/// error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TraceId {
    text: String,
    raw: Option<HeaderValue>,
}

impl TraceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            text: value.into(),
            raw: None,
        }
    }

    /// 32 lowercase hex characters, no separators.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }

    /// Read a non-blank inbound trace id, verbatim.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(&TRACE_ID_HEADER)?;
        if value.as_bytes().iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        Some(Self {
            text: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            raw: Some(value.clone()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Original header bytes when the id came from the request.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.raw {
            Some(raw) => raw.as_bytes(),
            None => self.text.as_bytes(),
        }
    }

    pub fn header_value(&self) -> Option<HeaderValue> {
        match &self.raw {
            Some(raw) => Some(raw.clone()),
            None => HeaderValue::from_str(&self.text).ok(),
        }
    }
}

impl PartialEq for TraceId {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for TraceId {}

impl Hash for TraceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl From<String> for TraceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.text
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Per-request slot the pipeline threads through request extensions.
///
/// Filled once by [`TraceContextFilter`], read by the pipeline when a failure
/// has to be rendered.
#[derive(Debug, Clone, Default)]
pub struct TraceSlot(Arc<OnceLock<TraceId>>);

impl TraceSlot {
    pub fn set(&self, trace_id: TraceId) {
        let _ = self.0.set(trace_id);
    }

    pub fn get(&self) -> Option<&TraceId> {
        self.0.get()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ambient Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Access to the trace id of the request currently being processed.
pub struct TraceContext;

impl TraceContext {
    /// Trace id of the enclosing request scope, if any.
    pub fn current() -> Option<TraceId> {
        CURRENT_TRACE_ID.try_with(TraceId::clone).ok()
    }

    /// Run `future` with `trace_id` as the ambient trace id.
    ///
    /// The binding is removed when the future completes or is dropped.
    pub async fn scope<F: Future>(trace_id: TraceId, future: F) -> F::Output {
        CURRENT_TRACE_ID.scope(trace_id, future).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Completion Logging
// ═══════════════════════════════════════════════════════════════════════════════

/// Logs the terminal state of one request; logs cancellation on drop.
struct RequestLog {
    method: Method,
    path: String,
    started: Instant,
    span: Span,
    finished: bool,
}

impl RequestLog {
    fn finish(&mut self, status: StatusCode) {
        self.finished = true;
        let status = status.as_u16();
        let latency_ms = self.started.elapsed().as_millis() as u64;

        if status >= 500 {
            error!(parent: &self.span, method = %self.method, path = %self.path, status, latency_ms, "Gateway response");
        } else if status >= 400 {
            warn!(parent: &self.span, method = %self.method, path = %self.path, status, latency_ms, "Gateway response");
        } else {
            info!(parent: &self.span, method = %self.method, path = %self.path, status, latency_ms, "Gateway response");
        }
    }
}

impl Drop for RequestLog {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                parent: &self.span,
                method = %self.method,
                path = %self.path,
                latency_ms = self.started.elapsed().as_millis() as u64,
                "Request cancelled before completion"
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Filter
// ═══════════════════════════════════════════════════════════════════════════════

/// Assigns the trace id and logs the request outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextFilter;

#[async_trait]
impl Filter for TraceContextFilter {
    fn name(&self) -> &'static str {
        "trace_context"
    }

    fn priority(&self) -> i32 {
        TRACE_PRIORITY
    }

    async fn apply(&self, mut request: Request<Body>, next: Next) -> Result<Response> {
        let started = Instant::now();
        let trace_id = TraceId::from_headers(request.headers()).unwrap_or_else(TraceId::generate);
        let header_value = trace_id.header_value();

        if let Some(slot) = request.extensions().get::<TraceSlot>() {
            slot.set(trace_id.clone());
        }
        if let Some(value) = header_value.clone() {
            request.headers_mut().insert(TRACE_ID_HEADER.clone(), value);
        }
        request.extensions_mut().insert(trace_id.clone());

        let span = info_span!(
            "gateway_request",
            trace_id = %trace_id,
            method = %request.method(),
            path = %request.uri().path(),
        );
        let mut log = RequestLog {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            started,
            span: span.clone(),
            finished: false,
        };
        info!(parent: &span, "Incoming request");

        let result = TraceContext::scope(trace_id, next.run(request))
            .instrument(span)
            .await;

        match result {
            Ok(mut response) => {
                log.finish(response.status());
                if let Some(value) = header_value {
                    response.headers_mut().insert(TRACE_ID_HEADER.clone(), value);
                }
                Ok(response)
            }
            Err(error) => {
                log.finish(ErrorMapper::classify(&error).http_status());
                Err(error)
            }
        }
    }
}
