//! Circuit breaker fallback responses.
//!
//! The circuit breaker itself lives outside this crate. When it opens for a
//! route it dispatches to `/__fallback/<route-name>`, which always answers
//! `503 DOWNSTREAM_UNAVAILABLE`. These paths are meant to be mounted on the
//! routing engine's internal router, never exposed to client traffic.

use axum::{
    extract::{Path, State},
    response::Response,
    routing::any,
    Extension, Router,
};
use metrics::counter;
use tracing::warn;

use crate::{
    error::{ErrorCode, GatewayError},
    middleware::{error_mapper::envelope_response, TraceContext, TraceId},
};

/// Prefix of every fallback path.
pub const FALLBACK_PREFIX: &str = "/__fallback";

/// Fixed `DOWNSTREAM_UNAVAILABLE` responder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackResponder;

impl FallbackResponder {
    /// Path the circuit breaker dispatches to for `route`.
    pub fn path_for(route: &str) -> String {
        format!("{FALLBACK_PREFIX}/{route}")
    }

    /// Build the 503 envelope for `route`.
    ///
    /// Uses `trace_id` when given, otherwise the ambient request trace id.
    pub fn respond(&self, route: &str, trace_id: Option<TraceId>) -> Response {
        let trace_id = trace_id.or_else(TraceContext::current);

        warn!(
            route,
            trace_id = trace_id.as_ref().map(TraceId::as_str),
            "Circuit breaker fallback triggered"
        );
        counter!("gateway_fallback_total", "route" => route.to_string()).increment(1);

        envelope_response(&GatewayError::new(ErrorCode::DownstreamUnavailable, trace_id))
    }

    /// Router serving `/__fallback/:route` for every method.
    pub fn router(self) -> Router {
        Router::new()
            .route(&format!("{FALLBACK_PREFIX}/:route"), any(fallback_handler))
            .with_state(self)
    }
}

async fn fallback_handler(
    State(responder): State<FallbackResponder>,
    Path(route): Path<String>,
    trace_id: Option<Extension<TraceId>>,
) -> Response {
    responder.respond(&route, trace_id.map(|Extension(id)| id))
}
