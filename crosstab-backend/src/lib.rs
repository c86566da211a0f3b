pub mod config;
mod error;
pub mod helpers;
pub mod registry;
mod routes;
mod validation;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::StatusCode,
    routing::{delete, get, post},
};
use crosstab_core::CrossTab;
use registry::MemoryRegistry;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

pub struct AppState {
    pub crosstab: CrossTab,
    pub registry: Arc<MemoryRegistry>,
    /// SHA-256 of the shared API key; `None` leaves the API open
    pub api_key_hash: Option<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for roster reports (/join, /leave, /sync)
    pub report_per_sec: u64,
    /// Burst size for roster reports
    pub report_burst: u32,
    /// Requests per second for control endpoints
    pub control_per_sec: u64,
    /// Burst size for control endpoints
    pub control_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            report_per_sec: 50,
            report_burst: 100,
            control_per_sec: 10,
            control_burst: 20,
        }
    }
}

impl From<&config::Config> for RateLimitConfig {
    fn from(config: &config::Config) -> Self {
        Self {
            report_per_sec: config.rate_limit_report_per_sec,
            report_burst: config.rate_limit_report_burst,
            control_per_sec: config.rate_limit_control_per_sec,
            control_burst: config.rate_limit_control_burst,
        }
    }
}

/// Create the application router
pub fn create_app(
    state: AppState,
    request_body_limit: usize,
    request_timeout: Duration,
    rate_limit: RateLimitConfig,
) -> Result<Router> {
    let state = Arc::new(state);

    // Lenient rate limit for roster reports - many players join/leave at once
    let report_governor = GovernorConfigBuilder::default()
        .per_second(rate_limit.report_per_sec)
        .burst_size(rate_limit.report_burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .context("invalid report rate limit")?;

    let control_governor = GovernorConfigBuilder::default()
        .per_second(rate_limit.control_per_sec)
        .burst_size(rate_limit.control_burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .context("invalid control rate limit")?;

    let report_routes = Router::new()
        .route("/join", post(routes::join))
        .route("/leave", post(routes::leave))
        .route("/sync", post(routes::sync))
        .layer(GovernorLayer::new(report_governor));

    let control_routes = Router::new()
        .route("/servers", post(routes::register_server))
        .route("/servers/{name}", delete(routes::unregister_server))
        .route("/refresh", post(routes::refresh_all))
        .route("/refresh/{server}", post(routes::refresh_server))
        .route("/resync", post(routes::resync))
        .route("/status", get(routes::status))
        .layer(GovernorLayer::new(control_governor));

    Ok(Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(report_routes)
        .merge(control_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .with_state(state))
}
