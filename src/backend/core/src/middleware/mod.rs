//! Gateway filters and the pipeline that orders them.
pub mod pipeline;
pub mod tracing;
pub mod auth;
pub mod rate_limit;
pub mod error_mapper;

pub use pipeline::{Downstream, Filter, FilterPipeline, FilterPipelineBuilder, GatewayLayer, GatewayService, Next, PipelineError};
pub use tracing::{TraceContext, TraceContextFilter, TraceId, TraceSlot, TRACE_ID_HEADER, TRACE_PRIORITY};
pub use auth::{AuthFilter, AUTH_PRIORITY};
pub use rate_limit::{
    spawn_eviction_task, BucketRegistry, ClientKey, RateLimitConfig, RateLimitFilter, TokenBucket,
    RATE_LIMIT_PRIORITY,
};
pub use error_mapper::{ErrorMapper, FALLBACK_BODY};
