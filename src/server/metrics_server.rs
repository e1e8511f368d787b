// src/server/metrics_server.rs

use crate::core::metrics::gather_metrics;
use crate::core::state::ServerState;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
///
/// It refreshes the gauges that are cheaper to sample on demand before
/// gathering all registered metrics in the Prometheus text format.
async fn metrics_handler(state: Arc<ServerState>) -> impl IntoResponse {
    crate::core::metrics::CONNECTED_CLIENTS.set(state.registry.len() as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = {
        let config = state.config.lock().await;
        config.metrics.port
    };

    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    });

    if let Err(e) = server.await {
        error!("Metrics server error: {}", e);
    }
}
