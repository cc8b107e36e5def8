//! The crate-wide error type and its conversions.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced anywhere in the cluster synchronization core.
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    #[error("incomplete frame")]
    IncompleteFrame,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("integrity not calculated yet")]
    IntegrityNotReady,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("sync already in progress: {0}")]
    SyncInProgress(&'static str),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("validation warning: {0}")]
    Validation(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PartialEq for ClusterError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl From<io::Error> for ClusterError {
    fn from(e: io::Error) -> Self {
        ClusterError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Manifest(e.to_string())
    }
}

impl From<toml::de::Error> for ClusterError {
    fn from(e: toml::de::Error) -> Self {
        ClusterError::Config(e.to_string())
    }
}

impl From<zip::result::ZipError> for ClusterError {
    fn from(e: zip::result::ZipError) -> Self {
        ClusterError::Archive(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for ClusterError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        ClusterError::MalformedFrame(e.to_string())
    }
}

impl From<std::num::ParseIntError> for ClusterError {
    fn from(e: std::num::ParseIntError) -> Self {
        ClusterError::MalformedFrame(e.to_string())
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
