//! The cluster listener's accept loop: spawns a [`ConnectionHandler`] per
//! client and drives the shutdown sequence.

use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use crate::connection::ConnectionHandler;

use super::initialization::ServerContext;

#[cfg(unix)]
async fn await_shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }
}

#[cfg(not(unix))]
async fn await_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl-c received, shutting down");
}

pub async fn run(mut ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => break,

            Some(res) = ctx.background_tasks.join_next(), if !ctx.background_tasks.is_empty() => {
                if let Err(e) = res {
                    error!(error = ?e, "a background task panicked, shutting down");
                    break;
                }
            }

            accepted = ctx.listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        info!(%addr, "accepted cluster connection");
                        let state = ctx.state.clone();
                        let global_shutdown_rx = ctx.state.shutdown_tx.subscribe();
                        client_tasks.spawn(async move {
                            let mut handler = ConnectionHandler::new(socket, addr, state, global_shutdown_rx);
                            if let Err(e) = handler.run().await {
                                warn!(%addr, error = %e, "connection terminated");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept cluster connection"),
                }
            }

            Some(res) = client_tasks.join_next(), if !client_tasks.is_empty() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!(error = ?e, "a connection handler panicked");
                    }
                }
            }
        }
    }

    info!("broadcasting shutdown to all connections and background tasks");
    let _ = ctx.state.shutdown_tx.send(());

    let join_timeout = Duration::from_secs(ctx.state.config.worker_join_timeout_secs);
    if tokio::time::timeout(join_timeout, client_tasks.shutdown()).await.is_err() {
        warn!("timed out waiting for client connections to close");
    }
    if tokio::time::timeout(join_timeout, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("timed out waiting for background tasks to finish");
    }
    info!("shutdown complete");
}
