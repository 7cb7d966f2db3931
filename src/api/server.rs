use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{cancel_image, get_image, health, pending, prefetch, stats},
    state::AppState,
};
use crate::config::Config;
use crate::registry::Registry;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Routes for a prepared state; used by `run` and by tests
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/images", get(get_image).delete(cancel_image))
        .route("/prefetch", post(prefetch))
        .route("/stats", get(stats))
        .route("/pending", get(pending))
        .route("/health", get(health))
        .with_state(state)
        // gzip/deflate request bodies for large prefetch batches
        .layer(RequestDecompressionLayer::new())
}

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address.unwrap_or(config.server.bind_addr);

    let registry = Arc::new(Registry::from_config(&config, Handle::current())?);
    let state = AppState::new(Arc::clone(&registry));
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "imagebox server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for name in registry.loader_names() {
        registry.cleanup_loader_with_name(&name);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
