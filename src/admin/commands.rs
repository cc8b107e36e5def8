//! Implements the admin endpoint's read/control commands. Each handler takes
//! the already-parsed [`Command`] and returns the `ok <json>` / `err <json>`
//! response frame; nothing here talks to the wire directly.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::protocol::{Command, Frame};
use crate::state::ServerState;

pub fn dispatch(state: &Arc<ServerState>, counter: u32, command: Command) -> Frame {
    match command {
        Command::GetNodes => get_nodes(state, counter),
        Command::GetHealth { filter } => get_health(state, counter, filter),
        Command::GetAgents { args } => get_agents(state, counter, &args),
        Command::Sync { nodes } => sync(state, counter, nodes),
        Command::GetFiles { args } => get_files(state, counter, &args),
        Command::FileStatus { path } => file_status(state, counter, &path),
        Command::SetLogLevel { level } => set_log_level(state, counter, &level),
        other => Frame::err(counter, format!("{} is not an admin command", other.name())),
    }
}

fn json_ok(counter: u32, value: impl Serialize) -> Frame {
    match serde_json::to_vec(&value) {
        Ok(body) => Frame::ok(counter, &body),
        Err(e) => Frame::err(counter, format!("failed to encode response: {e}")),
    }
}

#[derive(Serialize)]
struct NodeInfo {
    name: String,
    addr: String,
    version: String,
    connected_at: chrono::DateTime<chrono::Utc>,
}

fn get_nodes(state: &Arc<ServerState>, counter: u32) -> Frame {
    let nodes: Vec<NodeInfo> = state
        .clients
        .iter()
        .map(|entry| {
            let c = entry.value();
            NodeInfo {
                name: c.name.clone(),
                addr: c.addr.to_string(),
                version: c.version.clone(),
                connected_at: c.connected_at,
            }
        })
        .collect();
    json_ok(counter, json!({ "nodes": nodes }))
}

fn get_health(state: &Arc<ServerState>, counter: u32, filter: Option<String>) -> Frame {
    let mut healths = serde_json::Map::new();
    for entry in state.clients.iter() {
        let name = entry.key().clone();
        if let Some(f) = &filter {
            if !name.contains(f.as_str()) {
                continue;
            }
        }
        let status = entry.value().status.lock();
        healths.insert(
            name,
            json!({
                "last_sync_integrity": &status.last_sync_integrity,
                "last_sync_agentinfo": &status.last_sync_agentinfo,
                "last_sync_agentgroups": &status.last_sync_agentgroups,
            }),
        );
    }
    json_ok(counter, serde_json::Value::Object(healths))
}

fn get_agents(state: &Arc<ServerState>, counter: u32, args: &str) -> Frame {
    let search = args.trim();
    let mut ids: Vec<String> = state
        .agent_directory
        .known_ids()
        .into_iter()
        .filter(|id| search.is_empty() || id.contains(search))
        .collect();
    ids.sort();
    json_ok(counter, json!({ "items": ids, "totalItems": ids.len() }))
}

/// Requests a fresh integrity/agent-info/agent-groups push from the named
/// nodes (or every connected node). A client learns of the request only by
/// polling its own permit queries, since the master never pushes a sync
/// request down an already-open connection in this protocol; this command's
/// effect is limited to what's observable today: the current permit state of
/// each targeted node.
fn sync(state: &Arc<ServerState>, counter: u32, nodes: Option<String>) -> Frame {
    let targets: Vec<String> = match &nodes {
        Some(csv) => csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => state.clients.iter().map(|e| e.key().clone()).collect(),
    };

    let mut affected = Vec::new();
    for name in &targets {
        match state.client(name) {
            Some(client) => {
                let status = client.status.lock();
                affected.push(json!({
                    "name": name,
                    "sync_integrity_free": status.sync_integrity_free,
                    "sync_agentinfo_free": status.sync_agentinfo_free,
                    "sync_extravalid_free": status.sync_extravalid_free,
                }));
            }
            None => return Frame::err(counter, format!("node not found: {name}")),
        }
    }
    json_ok(counter, json!({ "affected_nodes": affected }))
}

fn get_files(state: &Arc<ServerState>, counter: u32, args: &str) -> Frame {
    let (paths_part, nodes_part) = match args.split_once(';') {
        Some((p, n)) => (p, Some(n)),
        None => (args, None),
    };
    let paths: Vec<&str> = paths_part.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();

    let catalog = match state.read_catalog() {
        Ok(c) => c,
        Err(e) => return Frame::err(counter, e.to_string()),
    };

    let node_names: Vec<String> = match nodes_part {
        Some(csv) => csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => Vec::new(),
    };

    // `get_files` without a node filter answers against the master's own
    // authoritative catalog.
    if node_names.is_empty() {
        return json_ok(counter, files_for_catalog(&catalog, &paths));
    }

    let mut per_node = serde_json::Map::new();
    for name in &node_names {
        if state.client(name).is_none() {
            return Frame::err(counter, "node not found".to_string());
        }
        per_node.insert(name.clone(), files_for_catalog(&catalog, &paths));
    }
    json_ok(counter, serde_json::Value::Object(per_node))
}

fn files_for_catalog(catalog: &crate::catalog::Catalog, paths: &[&str]) -> serde_json::Value {
    if paths.is_empty() {
        let entries: serde_json::Map<String, serde_json::Value> = catalog
            .files
            .iter()
            .map(|(path, entry)| (path.clone(), json!({ "md5": entry.md5, "mtime": entry.mtime })))
            .collect();
        return serde_json::Value::Object(entries);
    }
    let entries: serde_json::Map<String, serde_json::Value> = paths
        .iter()
        .map(|path| {
            let value = match catalog.get(path) {
                Some(entry) => json!({ "md5": entry.md5, "mtime": entry.mtime }),
                None => serde_json::Value::Null,
            };
            (path.to_string(), value)
        })
        .collect();
    serde_json::Value::Object(entries)
}

fn file_status(state: &Arc<ServerState>, counter: u32, path: &str) -> Frame {
    let catalog = match state.read_catalog() {
        Ok(c) => c,
        Err(e) => return Frame::err(counter, e.to_string()),
    };
    match catalog.get(path) {
        Some(entry) => json_ok(counter, json!({ "md5": entry.md5, "mtime": entry.mtime })),
        None => Frame::err(counter, format!("no such path in catalog: {path}")),
    }
}

fn set_log_level(state: &Arc<ServerState>, counter: u32, level: &str) -> Frame {
    match state.set_log_level(level) {
        Ok(()) => json_ok(counter, json!({ "level": level })),
        Err(e) => Frame::err(counter, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::InMemoryAgentDirectory;
    use crate::config::{Config, NodeType};
    use crate::state::ServerState;

    fn test_config() -> Config {
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
            root_dir: "/tmp".into(),
            admin_bind_addr: "127.0.0.1".into(),
            admin_port: 0,
            metrics_port: 0,
            worker_join_timeout_secs: 2,
        }
    }

    #[test]
    fn get_nodes_lists_connected_clients() {
        let init = ServerState::initialize(test_config(), Arc::new(InMemoryAgentDirectory::default()));
        let frame = get_nodes(&init.state, 1);
        assert!(frame.payload.starts_with(b"ok "));
    }

    #[test]
    fn sync_on_unknown_node_is_an_error() {
        let init = ServerState::initialize(test_config(), Arc::new(InMemoryAgentDirectory::default()));
        let frame = sync(&init.state, 1, Some("ghost".to_string()));
        assert!(frame.payload.starts_with(b"err "));
    }

    #[test]
    fn get_files_on_unknown_node_is_an_error_not_a_null() {
        let init = ServerState::initialize(test_config(), Arc::new(InMemoryAgentDirectory::default()));
        let mut catalog = crate::catalog::Catalog::default();
        catalog.files.insert(
            "/etc/shared/a.conf".into(),
            crate::catalog::FileEntry { md5: "x".into(), mtime: 0, cluster_item_key: "/etc/shared/".into() },
        );
        init.state.swap_catalog(catalog);
        let frame = get_files(&init.state, 1, "a.conf;ghost");
        assert_eq!(frame.payload, bytes::Bytes::from_static(b"err node not found"));
    }
}
