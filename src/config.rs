//! Process configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{ClusterError, ClusterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Master,
    Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedNode {
    pub name: String,
    pub addr: String,
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1516
}

fn default_recalculate_integrity() -> u64 {
    8
}

fn default_sync_agentinfo_interval() -> u64 {
    10
}

fn default_sync_agentgroups_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_root_dir() -> String {
    ".".to_string()
}

fn default_admin_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    1517
}

fn default_metrics_port() -> u16 {
    9516
}

fn default_worker_join_timeout_secs() -> u64 {
    2
}

/// Raw, as-deserialized configuration. All optional fields carry defaults so that a
/// minimal TOML file (just `node_name` and `node_type`) is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub node_name: String,
    pub node_type: NodeType,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub nodes: Vec<SeedNode>,

    #[serde(default = "default_recalculate_integrity")]
    pub recalculate_integrity: u64,
    #[serde(default = "default_sync_agentinfo_interval")]
    pub sync_agentinfo_interval: u64,
    #[serde(default = "default_sync_agentgroups_interval")]
    pub sync_agentgroups_interval: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_admin_bind_addr")]
    pub admin_bind_addr: String,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_worker_join_timeout_secs")]
    pub worker_join_timeout_secs: u64,
}

/// Validated configuration, the shape the rest of the crate consumes.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub node_type: NodeType,
    pub bind_addr: String,
    pub port: u16,
    pub nodes: Vec<SeedNode>,
    pub recalculate_integrity: u64,
    pub sync_agentinfo_interval: u64,
    pub sync_agentgroups_interval: u64,
    pub log_level: String,
    pub root_dir: PathBuf,
    pub admin_bind_addr: String,
    pub admin_port: u16,
    pub metrics_port: u16,
    pub worker_join_timeout_secs: u64,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> ClusterResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ClusterError::Config(format!("reading {:?}: {e}", path.as_ref())))?;
        let raw: RawConfig = toml::from_str(&text)?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> ClusterResult<Self> {
        if raw.node_name.trim().is_empty() {
            return Err(ClusterError::Config("node_name must not be empty".into()));
        }
        if raw.recalculate_integrity == 0 {
            return Err(ClusterError::Config(
                "recalculate_integrity must be greater than zero".into(),
            ));
        }
        Ok(Config {
            node_name: raw.node_name,
            node_type: raw.node_type,
            bind_addr: raw.bind_addr,
            port: raw.port,
            nodes: raw.nodes,
            recalculate_integrity: raw.recalculate_integrity,
            sync_agentinfo_interval: raw.sync_agentinfo_interval,
            sync_agentgroups_interval: raw.sync_agentgroups_interval,
            log_level: raw.log_level,
            root_dir: PathBuf::from(raw.root_dir),
            admin_bind_addr: raw.admin_bind_addr,
            admin_port: raw.admin_port,
            metrics_port: raw.metrics_port,
            worker_join_timeout_secs: raw.worker_join_timeout_secs,
        })
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root_dir.join("queue").join("cluster")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.queue_dir().join("lockdir")
    }

    pub fn client_dir(&self, client_name: &str) -> PathBuf {
        self.queue_dir().join(client_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let raw: RawConfig = toml::from_str("node_name = \"master01\"\nnode_type = \"master\"\n")
            .expect("parse");
        let cfg = Config::validate(raw).expect("validate");
        assert_eq!(cfg.port, default_port());
        assert_eq!(cfg.recalculate_integrity, 8);
    }

    #[test]
    fn empty_node_name_rejected() {
        let raw: RawConfig = toml::from_str("node_name = \"\"\nnode_type = \"client\"\n")
            .expect("parse");
        assert!(Config::validate(raw).is_err());
    }
}
