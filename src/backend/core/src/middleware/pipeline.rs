//! Ordered filter pipeline.
//!
//! Filters are registered once at startup and sorted by ascending priority.
//! Each filter receives the request and a [`Next`] continuation; it either
//! calls `next.run(request)` and propagates the outcome, or returns early with
//! a response or a [`FilterError`]. The pipeline is the single boundary where
//! failures are handed to the [`ErrorMapper`].
//!
//! # Example
//!
//! ```rust,ignore
//! use edge_gateway::middleware::{FilterPipeline, GatewayLayer};
//!
//! let pipeline = FilterPipeline::standard(registry)?;
//! let app = routing_engine.layer(GatewayLayer::new(pipeline));
//! ```

use async_trait::async_trait;
use axum::{body::Body, extract::Request, response::Response};
use futures::future::BoxFuture;
use std::{
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll},
};
use thiserror::Error;
use tower::{util::BoxCloneService, Layer, Service, ServiceExt};
use tracing::debug;

use super::{
    auth::AuthFilter,
    error_mapper::ErrorMapper,
    rate_limit::{BucketRegistry, RateLimitFilter},
    tracing::{TraceContextFilter, TraceSlot},
};
use crate::error::{BoxError, FilterError, Result};

/// Type-erased downstream routing stage.
pub type Downstream = BoxCloneService<Request<Body>, Response, BoxError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Filter Capability
// ═══════════════════════════════════════════════════════════════════════════════

/// A single request-processing step.
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Lower values run earlier.
    fn priority(&self) -> i32;

    /// Process the request, either calling `next` or terminating the chain.
    async fn apply(&self, request: Request<Body>, next: Next) -> Result<Response>;
}

/// Continuation over the remaining filters and the downstream stage.
pub struct Next {
    filters: Arc<[Arc<dyn Filter>]>,
    index: usize,
    downstream: Downstream,
}

impl Next {
    fn new(filters: Arc<[Arc<dyn Filter>]>, downstream: Downstream) -> Self {
        Self {
            filters,
            index: 0,
            downstream,
        }
    }

    /// Run the rest of the chain.
    pub async fn run(mut self, request: Request<Body>) -> Result<Response> {
        match self.filters.get(self.index).cloned() {
            Some(filter) => {
                self.index += 1;
                filter.apply(request, self).await
            }
            None => self
                .downstream
                .oneshot(request)
                .await
                .map_err(FilterError::from_downstream),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════════

/// Pipeline construction errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Filters '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority {
        priority: i32,
        first: &'static str,
        second: &'static str,
    },
}

/// Immutable, priority-ordered filter chain.
#[derive(Clone)]
pub struct FilterPipeline {
    filters: Arc<[Arc<dyn Filter>]>,
    mapper: ErrorMapper,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("filters", &self.order())
            .finish()
    }
}

impl FilterPipeline {
    pub fn builder() -> FilterPipelineBuilder {
        FilterPipelineBuilder::default()
    }

    /// Trace context, then credential presence, then rate limiting.
    pub fn standard(registry: Arc<BucketRegistry>) -> std::result::Result<Self, PipelineError> {
        Self::builder()
            .filter(TraceContextFilter)
            .filter(AuthFilter)
            .filter(RateLimitFilter::new(registry))
            .build()
    }

    /// Filter names and priorities in execution order.
    pub fn order(&self) -> Vec<(&'static str, i32)> {
        self.filters
            .iter()
            .map(|filter| (filter.name(), filter.priority()))
            .collect()
    }

    /// Run one request through the chain, rendering any failure.
    pub async fn execute(&self, mut request: Request<Body>, downstream: Downstream) -> Response {
        let slot = TraceSlot::default();
        request.extensions_mut().insert(slot.clone());

        match Next::new(self.filters.clone(), downstream).run(request).await {
            Ok(response) => response,
            Err(error) => self.mapper.render(&error, slot.get().cloned()),
        }
    }
}

/// Builder collecting filters before the order is frozen.
#[derive(Default)]
pub struct FilterPipelineBuilder {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterPipelineBuilder {
    pub fn filter(mut self, filter: impl Filter) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn build(mut self) -> std::result::Result<FilterPipeline, PipelineError> {
        self.filters.sort_by_key(|filter| filter.priority());

        if let Some(pair) = self
            .filters
            .windows(2)
            .find(|pair| pair[0].priority() == pair[1].priority())
        {
            return Err(PipelineError::DuplicatePriority {
                priority: pair[0].priority(),
                first: pair[0].name(),
                second: pair[1].name(),
            });
        }

        for filter in &self.filters {
            debug!(filter = filter.name(), priority = filter.priority(), "Registered filter");
        }

        Ok(FilterPipeline {
            filters: self.filters.into(),
            mapper: ErrorMapper,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer placing the pipeline in front of a routing service.
#[derive(Clone)]
pub struct GatewayLayer {
    pipeline: Arc<FilterPipeline>,
}

impl GatewayLayer {
    pub fn new(pipeline: FilterPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

impl<S> Layer<S> for GatewayLayer {
    type Service = GatewayService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GatewayService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Service running every request through the pipeline.
#[derive(Clone)]
pub struct GatewayService<S> {
    inner: S,
    pipeline: Arc<FilterPipeline>,
}

impl<S> Service<Request<Body>> for GatewayService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        // Downstream readiness is awaited per call through `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let pipeline = self.pipeline.clone();
        let downstream: Downstream =
            BoxCloneService::new(self.inner.clone().map_err(Into::<BoxError>::into));

        Box::pin(async move { Ok(pipeline.execute(request, downstream).await) })
    }
}
