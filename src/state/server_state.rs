//! Process-wide shared state: the client table, the authoritative catalog,
//! and the collaborators every connection handler and worker needs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::agents::AgentDirectory;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::errors::{ClusterError, ClusterResult};

use super::client::ClientRecord;

/// Handle to the root tracing filter, installed by `main` and set here once
/// the subscriber is up, so the admin endpoint can raise or lower verbosity
/// without a restart.
pub type LogReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Process-wide state shared by the connection server, every client handler,
/// the integrity refresher, and the admin endpoint.
pub struct ServerState {
    pub config: Arc<Config>,
    pub clients: DashMap<String, Arc<ClientRecord>>,
    authoritative_catalog: RwLock<Catalog>,
    pub agent_directory: Arc<dyn AgentDirectory>,
    pub shutdown_tx: broadcast::Sender<()>,
    worker_id_counter: AtomicU64,
    pub agentgroups_warnings: AtomicU64,
    log_reload_handle: Mutex<Option<LogReloadHandle>>,
}

/// Bundle returned by [`ServerState::initialize`]: the shared state plus the
/// receiver side of the global shutdown channel, for whoever runs the accept
/// loop to subscribe to.
pub struct ServerInit {
    pub state: Arc<ServerState>,
    pub shutdown_rx: broadcast::Receiver<()>,
}

impl ServerState {
    pub fn initialize(config: Config, agent_directory: Arc<dyn AgentDirectory>) -> ServerInit {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let state = Arc::new(ServerState {
            config: Arc::new(config),
            clients: DashMap::new(),
            authoritative_catalog: RwLock::new(Catalog::default()),
            agent_directory,
            shutdown_tx,
            worker_id_counter: AtomicU64::new(1),
            agentgroups_warnings: AtomicU64::new(0),
            log_reload_handle: Mutex::new(None),
        });
        ServerInit { state, shutdown_rx }
    }

    /// Installs the tracing reload handle created in `main`. Called once
    /// during startup, after the subscriber is initialized.
    pub fn set_log_reload_handle(&self, handle: LogReloadHandle) {
        *self.log_reload_handle.lock() = Some(handle);
    }

    /// Reparses `level` as an `EnvFilter` and swaps it into the live
    /// subscriber. Fails if no handle was installed (e.g. in tests that
    /// never call `set_log_reload_handle`) or if `level` doesn't parse.
    pub fn set_log_level(&self, level: &str) -> ClusterResult<()> {
        let new_filter = EnvFilter::try_new(level).map_err(|e| ClusterError::Config(e.to_string()))?;
        let guard = self.log_reload_handle.lock();
        let handle = guard
            .as_ref()
            .ok_or_else(|| ClusterError::Internal("no log reload handle installed".into()))?;
        handle
            .reload(new_filter)
            .map_err(|e| ClusterError::Internal(e.to_string()))
    }

    pub fn next_worker_id(&self) -> u64 {
        self.worker_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Shared-lock read of the authoritative catalog. Fails if no refresh has
    /// completed yet.
    pub fn read_catalog(&self) -> ClusterResult<Catalog> {
        let guard = self.authoritative_catalog.read();
        if guard.is_empty() {
            return Err(ClusterError::IntegrityNotReady);
        }
        Ok(guard.clone())
    }

    /// Exclusive-lock atomic swap, called only by the integrity refresher.
    pub fn swap_catalog(&self, new_catalog: Catalog) {
        let mut guard = self.authoritative_catalog.write();
        *guard = new_catalog;
    }

    pub fn client(&self, name: &str) -> Option<Arc<ClientRecord>> {
        self.clients.get(name).map(|e| e.value().clone())
    }
}
