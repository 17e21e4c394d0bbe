//! HTTP router assembly for the standalone binary.

use axum::{http::StatusCode, routing::get, Router};
use tower::Layer;

use crate::{
    fallback::FallbackResponder,
    middleware::{FilterPipeline, GatewayLayer},
};

/// Build the application router.
///
/// `/health` is served directly, without credentials or rate limiting.
/// Everything else goes through the filter pipeline. No routing engine is
/// attached here, so past the pipeline every route is answered as
/// unavailable.
pub fn build_router(pipeline: FilterPipeline) -> Router {
    let responder = FallbackResponder;
    let unrouted = Router::new().fallback(move || async move { responder.respond("unrouted", None) });

    Router::new()
        .route("/health", get(health_check))
        .fallback_service(GatewayLayer::new(pipeline).layer(unrouted))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}
