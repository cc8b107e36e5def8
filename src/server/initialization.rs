//! Binds the cluster and admin listeners and spawns the fixed set of
//! background tasks every node runs regardless of `node_type`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::info;

use crate::agents::AgentDirectory;
use crate::config::Config;
use crate::state::{LogReloadHandle, ServerInit, ServerState};

use super::admin_loop;
use super::metrics_server;

pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub listener: TcpListener,
    pub background_tasks: JoinSet<()>,
}

pub async fn setup(
    config: Config,
    agent_directory: Arc<dyn AgentDirectory>,
    log_reload_handle: Option<LogReloadHandle>,
) -> Result<ServerContext> {
    info!(
        node_name = %config.node_name,
        node_type = ?config.node_type,
        root_dir = %config.root_dir.display(),
        "starting cluster node"
    );

    let admin_bind_addr = config.admin_bind_addr.clone();
    let admin_port = config.admin_port;
    let metrics_port = config.metrics_port;
    let bind_addr = config.bind_addr.clone();
    let port = config.port;

    let ServerInit { state, shutdown_rx } = ServerState::initialize(config, agent_directory);
    if let Some(handle) = log_reload_handle {
        state.set_log_reload_handle(handle);
    }

    let listener = TcpListener::bind((bind_addr.as_str(), port))
        .await
        .with_context(|| format!("binding cluster listener on {bind_addr}:{port}"))?;
    info!(addr = %listener.local_addr()?, "cluster listener bound");

    let mut background_tasks = JoinSet::new();

    background_tasks.spawn(crate::refresher::run(state.clone(), shutdown_rx));

    if admin_port != 0 {
        let admin_listener = TcpListener::bind((admin_bind_addr.as_str(), admin_port))
            .await
            .with_context(|| format!("binding admin listener on {admin_bind_addr}:{admin_port}"))?;
        info!(addr = %admin_listener.local_addr()?, "admin listener bound");
        let admin_state = state.clone();
        let admin_shutdown = state.shutdown_tx.subscribe();
        background_tasks.spawn(admin_loop::run(admin_state, admin_listener, admin_shutdown));
    }

    if metrics_port != 0 {
        let metrics_state = state.clone();
        let metrics_shutdown = state.shutdown_tx.subscribe();
        background_tasks.spawn(metrics_server::run(metrics_state, metrics_port, metrics_shutdown));
    }

    Ok(ServerContext {
        state,
        listener,
        background_tasks,
    })
}
