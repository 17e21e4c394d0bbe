//! Observability: logging subscriber and metric descriptions.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the logging stack.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    self::metrics::register_metrics();
    Ok(())
}

/// Metric descriptions.
pub mod metrics {
    use metrics::describe_counter;

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!(
            "gateway_errors_total",
            "Requests terminated with an error envelope, by error code"
        );
        describe_counter!(
            "gateway_rate_limit_checks_total",
            "Token bucket admission checks, by outcome"
        );
        describe_counter!(
            "gateway_fallback_total",
            "Circuit breaker fallback responses, by route"
        );
    }
}
