//! # Edge Gateway
//!
//! Request-filtering layer placed in front of backend services.
//!
//! ## Architecture
//!
//! - **Filter Pipeline**: Priority-ordered filters ahead of the routing stage
//! - **Trace Context**: `X-Trace-Id` correlation across headers and logs
//! - **Authentication**: Credential presence check
//! - **Rate Limiting**: Per-client token buckets with whole-second refill
//! - **Error Mapper**: One JSON error envelope for every failure
//! - **Fallback**: Fixed `503` responses for the circuit breaker
//! - **Server**: Router with an unfiltered health check

pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod middleware;
pub mod observability;
pub mod server;

pub use error::{ErrorCode, FilterError, GatewayError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, MockClock, SystemClock};
    pub use crate::config::{Config, ConfigError};
    pub use crate::error::{BoxError, ErrorCode, FilterError, GatewayError};
    pub use crate::fallback::FallbackResponder;
    pub use crate::middleware::{
        AuthFilter, BucketRegistry, ClientKey, ErrorMapper, Filter, FilterPipeline, GatewayLayer,
        GatewayService, Next, RateLimitConfig, RateLimitFilter, TokenBucket, TraceContext,
        TraceContextFilter, TraceId,
    };
}
