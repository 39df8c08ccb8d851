//! Discovery HTTP Server

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::directory::PartitionDirectory;
use crate::handlers::{self, AppState};

/// Create and configure the Axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Side endpoints
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/.well-known/jwks.json", get(handlers::jwks))
        // Connect unary RPCs
        .route(
            "/coral.discovery.v1.DiscoveryService/:method",
            post(handlers::rpc),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let directory = PartitionDirectory::new(
        config.data_dir.clone(),
        config.default_ttl_seconds,
        config.cleanup_interval_ms,
    )
    .map_err(|e| format!("Failed to prepare data directory: {}", e))?;

    let state = Arc::new(AppState::new(
        directory,
        config.service_version.clone(),
        config.signing_key.clone(),
        config.previous_keys.clone(),
    ));

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        environment = %config.environment,
        version = %config.service_version,
        "Discovery service listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGTERM or SIGINT signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C signal"),
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("Received SIGTERM signal");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                // Wait forever since we can't receive SIGTERM
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

    tracing::info!("Starting graceful shutdown...");
}
