//! Per-client connection handler: handshake, frame dispatch, worker spawn.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::admin;
use crate::atomic_update::AtomicUpdater;
use crate::errors::{ClusterError, ClusterResult};
use crate::protocol::{ClusterFrameCodec, Command, Frame};
use crate::state::{ClientRecord, ServerState, SyncKind};
use crate::workers::{self, SyncAck, WorkerContext};

pub struct ConnectionHandler {
    framed: Framed<TcpStream, ClusterFrameCodec>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    global_shutdown_rx: broadcast::Receiver<()>,
    client: Option<Arc<ClientRecord>>,
    /// Frames pushed by background workers (e.g. `sync_m_c`), interleaved
    /// with request/response frames on the same connection.
    worker_frame_rx: mpsc::UnboundedReceiver<Frame>,
    worker_frame_tx: mpsc::UnboundedSender<Frame>,
    /// Forwards the client's reply to the active integrity worker, if any.
    integrity_ack_tx: Option<mpsc::UnboundedSender<SyncAck>>,
}

impl ConnectionHandler {
    pub fn new(socket: TcpStream, addr: SocketAddr, state: Arc<ServerState>, global_shutdown_rx: broadcast::Receiver<()>) -> Self {
        let (worker_frame_tx, worker_frame_rx) = mpsc::unbounded_channel();
        Self {
            framed: Framed::new(socket, ClusterFrameCodec),
            addr,
            state,
            global_shutdown_rx,
            client: None,
            worker_frame_rx,
            worker_frame_tx,
            integrity_ack_tx: None,
        }
    }

    pub async fn run(&mut self) -> ClusterResult<()> {
        if let Err(e) = self.handshake().await {
            warn!(addr = %self.addr, error = %e, "handshake failed");
            return Err(e);
        }

        let mut local_shutdown_rx = self
            .client
            .as_ref()
            .expect("handshake sets client")
            .stopper
            .subscribe();

        loop {
            tokio::select! {
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    info!(addr = %self.addr, "connection closing on global shutdown");
                    break;
                }
                _ = local_shutdown_rx.recv() => {
                    info!(addr = %self.addr, "connection closing on local shutdown");
                    break;
                }
                pushed = self.worker_frame_rx.recv() => {
                    if let Some(frame) = pushed {
                        if self.framed.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(frame)) => {
                            if let Err(e) = self.process_frame(frame).await {
                                warn!(addr = %self.addr, error = %e, "error processing frame");
                            }
                        }
                        Some(Err(e)) => {
                            debug!(addr = %self.addr, error = %e, "connection error");
                            break;
                        }
                        None => {
                            debug!(addr = %self.addr, "connection closed by peer");
                            break;
                        }
                    }
                }
            }
        }

        if let Some(client) = self.client.take() {
            let _ = client.stopper.send(());
            // Only remove the map entry if it still points at this connection's
            // own record: a same-named reconnect may already have replaced it.
            self.state
                .clients
                .remove_if(&client.name, |_, current| Arc::ptr_eq(current, &client));
        }
        Ok(())
    }

    async fn handshake(&mut self) -> ClusterResult<()> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or_else(|| ClusterError::Protocol("connection closed before handshake".into()))??;
        let command = Command::try_from(&frame)?;
        let Command::Hello { name, version } = command else {
            return Err(ClusterError::Protocol("expected hello as first frame".into()));
        };

        if let Some(old) = self.state.clients.get(&name) {
            let _ = old.stopper.send(());
        }
        let record = Arc::new(ClientRecord::new(name.clone(), self.addr, version));
        self.state.clients.insert(name.clone(), record.clone());
        self.client = Some(record);
        self.framed.send(Frame::ok(frame.counter, b"welcome")).await?;
        info!(addr = %self.addr, client = %name, "client connected");
        Ok(())
    }

    async fn process_frame(&mut self, frame: Frame) -> ClusterResult<()> {
        let counter = frame.counter;
        let command = match Command::try_from(&frame) {
            Ok(c) => c,
            Err(ClusterError::UnknownCommand(name)) => {
                self.framed
                    .send(Frame::err(counter, format!("unknown command: {name}")))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let client = self.client.clone().expect("handshake sets client");

        let response = match command {
            Command::EchoC { token } => Some(Frame::ok(counter, &token)),
            Command::SyncIntegrityClientToMaster { archive } => {
                Some(self.start_integrity_worker(&client, counter, archive))
            }
            Command::SyncAgentInfoClientToMaster { archive } => {
                Some(self.start_agent_info_worker(&client, counter, archive))
            }
            Command::SyncExtraValidClientToMaster { archive } => {
                Some(self.start_extra_valid_worker(&client, counter, archive))
            }
            Command::SyncMasterToClientOk => {
                if let Some(tx) = &self.integrity_ack_tx {
                    let _ = tx.send(SyncAck::Applied);
                }
                None
            }
            Command::SyncMasterToClientErr { message } => {
                if let Some(tx) = &self.integrity_ack_tx {
                    let _ = tx.send(SyncAck::Failed(message));
                }
                None
            }
            Command::IntegrityPermitQuery => {
                Some(permit_response(counter, &client, SyncKind::Integrity))
            }
            Command::AgentInfoPermitQuery => {
                Some(permit_response(counter, &client, SyncKind::AgentInfo))
            }
            Command::ExtraValidPermitQuery => {
                Some(permit_response(counter, &client, SyncKind::ExtraValid))
            }
            admin_cmd @ (Command::GetNodes
            | Command::GetHealth { .. }
            | Command::GetAgents { .. }
            | Command::Sync { .. }
            | Command::GetFiles { .. }
            | Command::FileStatus { .. }) => {
                Some(admin::commands::dispatch(&self.state, counter, admin_cmd))
            }
            Command::Hello { .. } | Command::SyncMasterToClient { .. } => {
                Some(Frame::err(counter, "unexpected command on this connection"))
            }
        };

        if let Some(response) = response {
            self.framed.send(response).await?;
        }
        Ok(())
    }

    fn start_integrity_worker(&mut self, client: &Arc<ClientRecord>, counter: u32, archive: Bytes) -> Frame {
        if !client.try_acquire_permit(SyncKind::Integrity) {
            return Frame::err(counter, "sync already in progress");
        }
        let worker_id = self.state.next_worker_id();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        self.integrity_ack_tx = Some(ack_tx);
        let ctx = WorkerContext {
            client_name: client.name.clone(),
            worker_id,
            kind: SyncKind::Integrity,
            status: client.status.clone(),
            stopper: client.stopper.subscribe(),
            frame_tx: self.worker_frame_tx.clone(),
            ack_rx: Some(ack_rx),
        };
        let state = self.state.clone();
        tokio::spawn(workers::integrity::run(ctx, state, archive));
        Frame::ack(counter, worker_id.to_string())
    }

    fn start_agent_info_worker(&mut self, client: &Arc<ClientRecord>, counter: u32, archive: Bytes) -> Frame {
        if !client.try_acquire_permit(SyncKind::AgentInfo) {
            return Frame::err(counter, "sync already in progress");
        }
        let worker_id = self.state.next_worker_id();
        let ctx = WorkerContext {
            client_name: client.name.clone(),
            worker_id,
            kind: SyncKind::AgentInfo,
            status: client.status.clone(),
            stopper: client.stopper.subscribe(),
            frame_tx: self.worker_frame_tx.clone(),
            ack_rx: None,
        };
        let updater = Arc::new(AtomicUpdater::new(
            self.state.config.root_dir.clone(),
            self.state.config.lock_dir(),
        ));
        tokio::spawn(workers::agent_info::run(ctx, updater, archive));
        Frame::ack(counter, worker_id.to_string())
    }

    fn start_extra_valid_worker(&mut self, client: &Arc<ClientRecord>, counter: u32, archive: Bytes) -> Frame {
        if !client.try_acquire_permit(SyncKind::ExtraValid) {
            return Frame::err(counter, "sync already in progress");
        }
        let worker_id = self.state.next_worker_id();
        let ctx = WorkerContext {
            client_name: client.name.clone(),
            worker_id,
            kind: SyncKind::ExtraValid,
            status: client.status.clone(),
            stopper: client.stopper.subscribe(),
            frame_tx: self.worker_frame_tx.clone(),
            ack_rx: None,
        };
        let state = self.state.clone();
        let updater = Arc::new(AtomicUpdater::new(
            self.state.config.root_dir.clone(),
            self.state.config.lock_dir(),
        ));
        tokio::spawn(workers::extra_valid::run(ctx, state, updater, archive));
        Frame::ack(counter, worker_id.to_string())
    }
}

fn permit_response(counter: u32, client: &ClientRecord, kind: SyncKind) -> Frame {
    let status = client.status.lock();
    let free = match kind {
        SyncKind::Integrity => status.sync_integrity_free,
        SyncKind::AgentInfo => status.sync_agentinfo_free,
        SyncKind::ExtraValid => status.sync_extravalid_free,
    };
    Frame::ok(counter, if free { b"free" } else { b"busy" })
}
