//! Process entry point for the cluster daemon: binds the cluster and admin
//! listeners, spawns the integrity refresher and metrics server, then runs
//! the main accept loop until shutdown.

mod admin_loop;
mod connection_loop;
mod initialization;
mod metrics_server;

use std::sync::Arc;

use anyhow::Result;

use crate::agents::AgentDirectory;
use crate::config::Config;
use crate::state::LogReloadHandle;

pub async fn run(
    config: Config,
    agent_directory: Arc<dyn AgentDirectory>,
    log_reload_handle: Option<LogReloadHandle>,
) -> Result<()> {
    let ctx = initialization::setup(config, agent_directory, log_reload_handle).await?;
    connection_loop::run(ctx).await;
    Ok(())
}
