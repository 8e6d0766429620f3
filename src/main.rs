use luova::config::Settings;
use luova::engine::clock::SystemClock;
use luova::engine::events::HttpEventSink;
use luova::engine::{Context, Engine};
use luova::server::{
    build_router, create_metrics, run_server, shutdown_channel, wait_for_signal, ApiState,
    ReadinessState,
};
use luova::store::{MemoryStore, MetricsStore, SqliteStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting LUOVA creative experimentation engine");

    let settings = Settings::from_env()?;
    let thresholds = match settings.load_thresholds() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "Failed to load thresholds");
            return Err(e.into());
        }
    };

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let store: Arc<dyn MetricsStore> = if settings.uses_memory_store() {
        warn!("In-memory store selected - data is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        match SqliteStore::open(&settings.db_path) {
            Ok(s) => {
                info!(path = %settings.db_path, "SQLite store opened");
                Arc::new(s)
            }
            Err(e) => {
                error!(error = %e, path = %settings.db_path, "Failed to open store");
                return Err(e.into());
            }
        }
    };

    let events = HttpEventSink::new(settings.events_enabled, settings.events_sink_url.clone());
    info!(active = events.is_active(), "Event sink configured");

    let ctx = Arc::new(Context::new(
        store,
        Arc::new(events),
        Arc::new(SystemClock),
        thresholds,
        Some(metrics.clone()),
    ));
    let app = build_router(
        ApiState::new(Engine::new(ctx.clone()), ctx),
        readiness.clone(),
        metrics,
    );

    let server_handle = tokio::spawn(run_server(settings.port, app, shutdown_signal));

    readiness.set_ready();
    info!(port = settings.port, "Engine ready");

    match wait_for_signal().await {
        Ok(signal) => info!(signal = signal, "Initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for termination signals, shutting down"),
    }
    // Mark not ready so load balancers stop sending traffic during shutdown
    readiness.set_not_ready();
    shutdown_controller.shutdown();

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Server exited with error"),
        Err(e) => warn!(error = %e, "Server task failed"),
    }

    info!("LUOVA shut down gracefully");
    Ok(())
}
