use anyhow::{Context, Result};
use crosstab_backend::config::Config;
use crosstab_backend::registry::MemoryRegistry;
use crosstab_backend::{AppState, RateLimitConfig, create_app};
use crosstab_core::CrossTab;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting crosstab backend...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, body_limit={}KB, timeout={}s, auth={}, delivery={:?}",
        config.port,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.api_key_hash.is_some(),
        config.tab.delivery
    );
    tracing::info!(
        "Rate limits: report={}/sec (burst {}), control={}/sec (burst {})",
        config.rate_limit_report_per_sec,
        config.rate_limit_report_burst,
        config.rate_limit_control_per_sec,
        config.rate_limit_control_burst
    );

    let registry = Arc::new(MemoryRegistry::new());
    for (name, address) in &config.servers {
        registry.register_server(name, address).await;
    }
    tracing::info!(servers = registry.len(), "registered static servers");

    let crosstab = CrossTab::new(config.tab.clone(), registry.clone());
    crosstab.start().await;

    let app = create_app(
        AppState {
            crosstab: crosstab.clone(),
            registry,
            api_key_hash: config.api_key_hash.clone(),
        },
        config.request_body_limit,
        config.request_timeout,
        RateLimitConfig::from(&config),
    )?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;
    if let Err(e) = &served {
        tracing::error!("Axum server error: {}", e);
    }

    if !crosstab.shutdown().await {
        tracing::warn!("background work abandoned during shutdown");
    }
    served.context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
