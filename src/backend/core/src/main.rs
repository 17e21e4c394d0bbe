//! Edge Gateway - Main entry point

use std::{net::SocketAddr, sync::Arc};

use edge_gateway::{
    config::Config,
    middleware::{rate_limit::spawn_eviction_task, BucketRegistry, FilterPipeline},
    observability, server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match std::env::var("GATEWAY_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    observability::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        requests_per_second = config.rate_limit.requests_per_second,
        burst_capacity = config.rate_limit.burst_capacity,
        "Starting Edge Gateway"
    );

    let registry = Arc::new(BucketRegistry::new(config.rate_limit.clone())?);
    let eviction = spawn_eviction_task(registry.clone());
    let pipeline = FilterPipeline::standard(registry)?;
    tracing::info!(filters = ?pipeline.order(), "Filter pipeline ready");

    let app = server::build_router(pipeline);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = eviction {
        handle.abort();
    }
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
