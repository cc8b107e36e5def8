//! Serves the Prometheus text endpoint on its own port.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::metrics;
use crate::state::ServerState;

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> String {
    metrics::CONNECTED_CLIENTS.set(state.clients.len() as f64);
    metrics::AGENTGROUPS_WARNINGS_TOTAL.set(state.agentgroups_warnings.load(std::sync::atomic::Ordering::Relaxed) as f64);
    metrics::gather()
}

pub async fn run(state: Arc<ServerState>, port: u16, mut shutdown_rx: broadcast::Receiver<()>) {
    let addr: SocketAddr = match format!("0.0.0.0:{port}").parse() {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, "invalid metrics bind address");
            return;
        }
    };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, %addr, "failed to bind metrics listener");
            return;
        }
    };
    info!(%addr, "metrics endpoint listening");

    let serve = axum::serve(listener, app);
    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                warn!(error = %e, "metrics server exited with error");
            }
        }
        _ = shutdown_rx.recv() => {
            info!("metrics endpoint shutting down");
        }
    }
}
