//! Background task that rebuilds the master's authoritative catalog on a
//! fixed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::catalog::scan_catalog;
use crate::state::ServerState;

/// Runs until the shutdown broadcast fires. Intended to be spawned once, on
/// the master, inside a `JoinSet` the server loop tracks alongside other
/// background tasks.
pub async fn run(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let interval = Duration::from_secs(state.config.recalculate_integrity);
    info!(component = "integrity_refresher", interval_secs = interval.as_secs(), "starting");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!(component = "integrity_refresher", "stopping on shutdown signal");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let root_dir = state.config.root_dir.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut cancel_watch_rx = shutdown_rx.resubscribe();
        let cancel_for_watcher = cancel.clone();
        let watcher = tokio::spawn(async move {
            let _ = cancel_watch_rx.recv().await;
            cancel_for_watcher.store(true, Ordering::Relaxed);
        });

        let scan_cancel = cancel.clone();
        let scan_result =
            tokio::task::spawn_blocking(move || scan_catalog(&root_dir, scan_cancel.as_ref())).await;
        watcher.abort();

        match scan_result {
            Ok(Ok(catalog)) => {
                let file_count = catalog.len();
                state.swap_catalog(catalog);
                info!(component = "integrity_refresher", file_count, "catalog refreshed");
            }
            Ok(Err(e)) => {
                warn!(component = "integrity_refresher", error = %e, "catalog scan failed, keeping previous catalog");
            }
            Err(join_err) => {
                error!(component = "integrity_refresher", error = %join_err, "scan task panicked");
            }
        }

        if cancel.load(Ordering::Relaxed) {
            info!(component = "integrity_refresher", "stopping on shutdown signal observed mid-scan");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::InMemoryAgentDirectory;
    use crate::config::{Config, NodeType};
    use crate::state::ServerState;
    use std::time::Duration as StdDuration;

    fn test_config(root: std::path::PathBuf) -> Config {
        Config {
            node_name: "master01".into(),
            node_type: NodeType::Master,
            bind_addr: "127.0.0.1".into(),
            port: 0,
            nodes: vec![],
            recalculate_integrity: 1,
            sync_agentinfo_interval: 10,
            sync_agentgroups_interval: 10,
            log_level: "info".into(),
            root_dir: root,
            admin_bind_addr: "127.0.0.1".into(),
            admin_port: 0,
            metrics_port: 0,
            worker_join_timeout_secs: 2,
        }
    }

    #[tokio::test]
    async fn refresher_populates_catalog_then_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc/shared")).unwrap();
        std::fs::write(dir.path().join("etc/shared/a.conf"), b"x").unwrap();

        let init = ServerState::initialize(
            test_config(dir.path().to_path_buf()),
            Arc::new(InMemoryAgentDirectory::default()),
        );
        let state = init.state.clone();
        let shutdown_rx = state.shutdown_tx.subscribe();
        let handle = tokio::spawn(run(state.clone(), shutdown_rx));

        tokio::time::sleep(StdDuration::from_millis(1200)).await;
        assert_eq!(state.read_catalog().unwrap().len(), 1);

        state.shutdown_tx.send(()).ok();
        tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("refresher should stop promptly")
            .unwrap();
    }
}
