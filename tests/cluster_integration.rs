//! Black-box tests against the real TCP wire protocol: an in-process master
//! driven by `ConnectionHandler`, connected to by simulated clients over
//! loopback sockets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

use wazuh_cluster::agents::InMemoryAgentDirectory;
use wazuh_cluster::archive::{self, Manifest, ManifestEntry};
use wazuh_cluster::catalog::{Catalog, FileEntry};
use wazuh_cluster::config::{Config, NodeType};
use wazuh_cluster::connection::ConnectionHandler;
use wazuh_cluster::protocol::{ClusterFrameCodec, Frame};
use wazuh_cluster::state::{ServerState, SyncPhase};

fn test_config(root_dir: &std::path::Path) -> Config {
    Config {
        node_name: "master01".into(),
        node_type: NodeType::Master,
        bind_addr: "127.0.0.1".into(),
        port: 0,
        nodes: vec![],
        recalculate_integrity: 8,
        sync_agentinfo_interval: 10,
        sync_agentgroups_interval: 10,
        log_level: "info".into(),
        root_dir: root_dir.to_path_buf(),
        admin_bind_addr: "127.0.0.1".into(),
        admin_port: 0,
        metrics_port: 0,
        worker_join_timeout_secs: 2,
    }
}

/// Spawns an accept loop that hands every inbound connection to a fresh
/// `ConnectionHandler`, mirroring what `server::connection_loop` does in
/// production but without the shutdown-reap bookkeeping this test doesn't need.
async fn spawn_listener(state: Arc<ServerState>, shutdown_tx: &broadcast::Sender<()>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let state = state.clone();
            let rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut handler = ConnectionHandler::new(socket, peer, state, rx);
                let _ = handler.run().await;
            });
        }
    });
    addr
}

async fn connect_and_handshake(addr: std::net::SocketAddr, name: &str) -> Framed<TcpStream, ClusterFrameCodec> {
    let socket = TcpStream::connect(addr).await.expect("connect");
    let mut framed = Framed::new(socket, ClusterFrameCodec);
    framed
        .send(Frame::new(1, Bytes::from(format!("hello {name} 4.9.0"))))
        .await
        .expect("send hello");
    let reply = framed.next().await.expect("reply").expect("decode");
    let (kind, _) = reply.split_command();
    assert_eq!(kind, "ok");
    framed
}

#[tokio::test]
async fn handshake_then_echo_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let init = ServerState::initialize(config, Arc::new(InMemoryAgentDirectory::default()));
    let addr = spawn_listener(init.state.clone(), &init.state.shutdown_tx).await;

    let mut framed = connect_and_handshake(addr, "client01").await;

    framed
        .send(Frame::new(2, Bytes::from_static(b"echo-c ping-token")))
        .await
        .expect("send echo");
    let reply = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("no timeout")
        .expect("reply")
        .expect("decode");
    let (kind, body) = reply.split_command();
    assert_eq!(kind, "ok");
    assert_eq!(body, b"ping-token");

    assert!(init.state.client("client01").is_some());
}

#[tokio::test]
async fn second_hello_with_same_name_evicts_the_first_connection() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let init = ServerState::initialize(config, Arc::new(InMemoryAgentDirectory::default()));
    let addr = spawn_listener(init.state.clone(), &init.state.shutdown_tx).await;

    let mut first = connect_and_handshake(addr, "client01").await;
    let _second = connect_and_handshake(addr, "client01").await;

    // the first connection's stopper has fired; its next read should observe EOF.
    let outcome = tokio::time::timeout(Duration::from_secs(2), first.next()).await;
    match outcome {
        Ok(None) => {}
        Ok(Some(Err(_))) => {}
        other => panic!("expected the evicted connection to close, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_integrity_sync_from_the_same_client_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("etc/shared")).unwrap();
    std::fs::write(dir.path().join("etc/shared/a.conf"), b"hello").unwrap();

    let mut catalog = Catalog::default();
    catalog.files.insert(
        "/etc/shared/a.conf".to_string(),
        FileEntry {
            md5: format!("{:x}", md5::compute(b"hello")),
            mtime: 0,
            cluster_item_key: "/etc/shared/".to_string(),
        },
    );

    let config = test_config(dir.path());
    let init = ServerState::initialize(config, Arc::new(InMemoryAgentDirectory::default()));
    init.state.swap_catalog(catalog);
    let addr = spawn_listener(init.state.clone(), &init.state.shutdown_tx).await;

    let mut framed = connect_and_handshake(addr, "client01").await;

    let empty_manifest = Manifest::MasterFiles {
        master_files: BTreeMap::new(),
    };
    let empty_archive = archive::build(&empty_manifest, &[]).unwrap();

    framed
        .send(Frame::new(2, Bytes::from(
            [b"sync_i_c_m ".as_slice(), &empty_archive].concat(),
        )))
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.split_command().0, "ack");

    framed
        .send(Frame::new(3, Bytes::from(
            [b"sync_i_c_m ".as_slice(), &empty_archive].concat(),
        )))
        .await
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let (kind, body) = second.split_command();
    assert_eq!(kind, "err");
    assert_eq!(body, b"sync already in progress");
}

#[tokio::test]
async fn cold_start_integrity_sync_pushes_the_one_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("etc/shared")).unwrap();
    std::fs::write(dir.path().join("etc/shared/a.conf"), b"hello world").unwrap();

    let mut catalog = Catalog::default();
    catalog.files.insert(
        "/etc/shared/a.conf".to_string(),
        FileEntry {
            md5: format!("{:x}", md5::compute(b"hello world")),
            mtime: 0,
            cluster_item_key: "/etc/shared/".to_string(),
        },
    );

    let config = test_config(dir.path());
    let init = ServerState::initialize(config, Arc::new(InMemoryAgentDirectory::default()));
    init.state.swap_catalog(catalog);
    let addr = spawn_listener(init.state.clone(), &init.state.shutdown_tx).await;

    let mut framed = connect_and_handshake(addr, "client01").await;

    // client's view of master-owned files is empty: everything is "missing".
    let empty_manifest = Manifest::MasterFiles {
        master_files: BTreeMap::new(),
    };
    let empty_archive = archive::build(&empty_manifest, &[]).unwrap();
    framed
        .send(Frame::new(2, Bytes::from(
            [b"sync_i_c_m ".as_slice(), &empty_archive].concat(),
        )))
        .await
        .unwrap();

    let ack = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(ack.split_command().0, "ack");

    // the worker now pushes sync_m_c on the same connection.
    let pushed = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("no timeout waiting for sync_m_c")
        .unwrap()
        .unwrap();
    let (kind, body) = pushed.split_command();
    assert_eq!(kind, "sync_m_c");
    let (manifest, members) = archive::extract(body).unwrap();
    assert_eq!(manifest.entries().len(), 1);
    assert!(manifest.entries().contains_key("/etc/shared/a.conf"));
    assert_eq!(members.get("/etc/shared/a.conf").unwrap(), b"hello world");

    framed
        .send(Frame::new(3, Bytes::from_static(b"sync_m_c_ok")))
        .await
        .unwrap();

    // give the worker a moment to observe the ack and finalize its status.
    for _ in 0..50 {
        if let Some(client) = init.state.client("client01") {
            if matches!(client.status.lock().last_sync_integrity, SyncPhase::Done(_)) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("integrity sync never reached Done");
}

#[tokio::test]
async fn integrity_sync_before_any_refresh_fails_with_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let init = ServerState::initialize(config, Arc::new(InMemoryAgentDirectory::default()));
    let addr = spawn_listener(init.state.clone(), &init.state.shutdown_tx).await;

    let mut framed = connect_and_handshake(addr, "client01").await;

    let empty_manifest = Manifest::MasterFiles {
        master_files: BTreeMap::new(),
    };
    let empty_archive = archive::build(&empty_manifest, &[]).unwrap();
    framed
        .send(Frame::new(2, Bytes::from(
            [b"sync_i_c_m ".as_slice(), &empty_archive].concat(),
        )))
        .await
        .unwrap();

    let ack = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(ack.split_command().0, "ack");

    for _ in 0..50 {
        if let Some(client) = init.state.client("client01") {
            match &client.status.lock().last_sync_integrity {
                SyncPhase::Error(msg) => {
                    assert!(msg.contains("not ready") || msg.contains("IntegrityNotReady") || !msg.is_empty());
                    return;
                }
                SyncPhase::Done(_) => panic!("sync should not succeed before any catalog refresh"),
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("integrity sync never reached an error state");
}

#[tokio::test]
async fn disconnecting_mid_sync_frees_the_permit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("etc/shared")).unwrap();
    std::fs::write(dir.path().join("etc/shared/a.conf"), b"hello").unwrap();

    let mut catalog = Catalog::default();
    catalog.files.insert(
        "/etc/shared/a.conf".to_string(),
        FileEntry {
            md5: format!("{:x}", md5::compute(b"hello")),
            mtime: 0,
            cluster_item_key: "/etc/shared/".to_string(),
        },
    );

    let config = test_config(dir.path());
    let init = ServerState::initialize(config, Arc::new(InMemoryAgentDirectory::default()));
    init.state.swap_catalog(catalog);
    let addr = spawn_listener(init.state.clone(), &init.state.shutdown_tx).await;

    let mut framed = connect_and_handshake(addr, "client01").await;

    let empty_manifest = Manifest::MasterFiles {
        master_files: BTreeMap::new(),
    };
    let empty_archive = archive::build(&empty_manifest, &[]).unwrap();
    framed
        .send(Frame::new(2, Bytes::from(
            [b"sync_i_c_m ".as_slice(), &empty_archive].concat(),
        )))
        .await
        .unwrap();
    let ack = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(ack.split_command().0, "ack");

    // drop the connection before ever acking the pushed archive.
    drop(framed);

    // reconnecting under the same name evicts the stale record and starts clean.
    let mut reconnected = connect_and_handshake(addr, "client01").await;
    reconnected
        .send(Frame::new(2, Bytes::from_static(b"sync_i_c_m_p")))
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), reconnected.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let (kind, body) = reply.split_command();
    assert_eq!(kind, "ok");
    assert_eq!(body, b"free");
}

#[tokio::test]
async fn agent_groups_extra_valid_archive_round_trips_through_extraction() {
    // exercises the archive/manifest layer end to end the way the extra-valid
    // worker consumes a client-pushed archive, without needing a live agent
    // registry wired up.
    let mut client_files = BTreeMap::new();
    client_files.insert(
        "/queue/agent-groups/001".to_string(),
        ManifestEntry::plain("/queue/agent-groups/"),
    );
    let manifest = Manifest::ClientFiles { client_files };
    let members = vec![("/queue/agent-groups/001".to_string(), b"default,linux".to_vec())];
    let built = archive::build(&manifest, &members).unwrap();

    let (parsed, parsed_members) = archive::extract(&built).unwrap();
    assert_eq!(parsed.entries().len(), 1);
    assert_eq!(
        parsed_members.get("/queue/agent-groups/001").unwrap(),
        b"default,linux"
    );
}
