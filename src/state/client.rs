//! Per-client connection record: identity, status tree, and sync permits.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::status::ClientStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    Integrity,
    AgentInfo,
    ExtraValid,
}

impl SyncKind {
    pub fn label(self) -> &'static str {
        match self {
            SyncKind::Integrity => "integrity",
            SyncKind::AgentInfo => "agentinfo",
            SyncKind::ExtraValid => "extravalid",
        }
    }
}

pub struct ClientRecord {
    pub name: String,
    pub addr: SocketAddr,
    pub version: String,
    pub connected_at: DateTime<Utc>,
    pub status: Arc<Mutex<ClientStatus>>,
    /// Broadcast to every worker task spawned for this client; fired on
    /// disconnect so they stop at their next cooperative checkpoint.
    pub stopper: broadcast::Sender<()>,
}

impl ClientRecord {
    pub fn new(name: String, addr: SocketAddr, version: String) -> Self {
        let (stopper, _) = broadcast::channel(4);
        Self {
            name,
            addr,
            version,
            connected_at: Utc::now(),
            status: Arc::new(Mutex::new(ClientStatus::new())),
            stopper,
        }
    }

    /// Attempts to acquire the permit for `kind`. Returns `true` and flips the
    /// flag to false on success; returns `false` without mutating state if a
    /// worker of that kind is already running.
    pub fn try_acquire_permit(&self, kind: SyncKind) -> bool {
        self.status.lock().try_acquire(kind)
    }

    /// Releases the permit for `kind`. Idempotent: releasing an already-free
    /// permit is a no-op, which matters because cancellation and normal
    /// termination can race to release the same permit.
    pub fn release_permit(&self, kind: SyncKind) {
        self.status.lock().release(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn permit_is_mutually_exclusive() {
        let client = ClientRecord::new("agent01".into(), addr(), "1.0".into());
        assert!(client.try_acquire_permit(SyncKind::Integrity));
        assert!(!client.try_acquire_permit(SyncKind::Integrity));
        client.release_permit(SyncKind::Integrity);
        assert!(client.try_acquire_permit(SyncKind::Integrity));
    }

    #[test]
    fn different_kinds_are_independent() {
        let client = ClientRecord::new("agent01".into(), addr(), "1.0".into());
        assert!(client.try_acquire_permit(SyncKind::Integrity));
        assert!(client.try_acquire_permit(SyncKind::AgentInfo));
        assert!(client.try_acquire_permit(SyncKind::ExtraValid));
    }
}
