//! HTTP surface: JSON API, probes, metrics and graceful shutdown
//!
//! One listener serves everything:
//! - `/api/v1/...` - engine operations
//! - `/healthz`, `/readyz` - liveness and readiness probes
//! - `/metrics` - Prometheus scrape endpoint

pub mod api;
mod health;
pub mod metrics;
pub mod shutdown;

pub use api::ApiState;
pub use health::ReadinessState;
pub use metrics::{create_metrics, EngineMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// API, probe and metrics routes on one router
pub fn build_router(api: ApiState, readiness: ReadinessState, metrics: SharedMetrics) -> Router {
    api::router(api).merge(health::router(readiness, metrics))
}

/// Serve `app` on `port` until the shutdown signal fires
///
/// In-flight requests are allowed to finish before this returns.
pub async fn run_server(
    port: u16,
    app: Router,
    mut shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    // Log after successful bind - server is actually listening
    info!(port = %port, "API, health and metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "api_test.rs"]
mod api_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
