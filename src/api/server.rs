use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_check, ingest_report, list_intervals, list_monitors, list_observations,
    list_publishers, list_rules, run_probes, AppState,
};
use crate::config::MonitorConfig;
use crate::engine::MonitorEngine;

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Report intake
        .route("/reports", post(ingest_report))
        .route("/probes/run", post(run_probes))
        // History
        .route("/intervals", get(list_intervals))
        .route("/observations", get(list_observations))
        // Wiring and rule state
        .route("/monitors", get(list_monitors))
        .route("/publishers", get(list_publishers))
        .route("/rules", get(list_rules))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: MonitorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let engine = Arc::new(MonitorEngine::from_config(config)?);
    engine.start_workers();

    let state = Arc::new(AppState {
        engine: Arc::clone(&engine),
    });
    let app = build_router(state);

    tracing::info!("Starting pulsewatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, stopping workers...");
    engine.stop().await;

    tracing::info!("pulsewatch server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
}
