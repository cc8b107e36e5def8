//! Accept loop for the admin endpoint: no handshake, each connection just
//! trades frames for `ok <json>` / `err <json>` responses.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::admin;
use crate::protocol::{ClusterFrameCodec, Command, Frame};
use crate::state::ServerState;

pub async fn run(state: Arc<ServerState>, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("admin listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        let state = state.clone();
                        let client_shutdown = shutdown_rx.resubscribe();
                        tokio::spawn(serve_connection(state, socket, addr, client_shutdown));
                    }
                    Err(e) => warn!(error = %e, "failed to accept admin connection"),
                }
            }
        }
    }
}

async fn serve_connection(
    state: Arc<ServerState>,
    socket: tokio::net::TcpStream,
    addr: std::net::SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(socket, ClusterFrameCodec);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            next = framed.next() => {
                match next {
                    Some(Ok(frame)) => {
                        let counter = frame.counter;
                        let response = match Command::try_from(&frame) {
                            Ok(command) => admin::commands::dispatch(&state, counter, command),
                            Err(e) => Frame::err(counter, e.to_string()),
                        };
                        if framed.send(response).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(addr = %addr, error = %e, "admin connection error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
