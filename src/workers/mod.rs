//! The three sync worker state machines. Each worker owns only the channels
//! it needs — a stopper receiver, the client's status tree, and a sender for
//! frames back to the connection — never a back-pointer to the connection
//! handler itself.

pub mod agent_info;
pub mod extra_valid;
pub mod integrity;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::protocol::Frame;
use crate::state::{ClientStatus, SyncKind};

/// The client's reply to a `sync_m_c` push, routed to the waiting integrity
/// worker by the connection handler.
#[derive(Debug, Clone)]
pub enum SyncAck {
    Applied,
    Failed(String),
}

/// Everything a sync worker needs, and nothing more.
pub struct WorkerContext {
    pub client_name: String,
    pub worker_id: u64,
    pub kind: SyncKind,
    pub status: Arc<Mutex<ClientStatus>>,
    pub stopper: broadcast::Receiver<()>,
    pub frame_tx: mpsc::UnboundedSender<Frame>,
    /// Only populated for integrity workers, which alone need to await a
    /// client response after pushing an archive.
    pub ack_rx: Option<mpsc::UnboundedReceiver<SyncAck>>,
}

impl WorkerContext {
    pub fn release_permit(&self) {
        self.status.lock().release(self.kind);
    }

    /// True if a stop signal has already been broadcast. Workers check this
    /// between archive records and between I/O steps.
    pub fn should_stop(&mut self) -> bool {
        matches!(self.stopper.try_recv(), Ok(()))
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        // Guarantees the permit flips back even if the worker returns early
        // via `?` without an explicit release call.
        self.release_permit();
    }
}
