//! Error types for redis-broker

use crate::types::InstanceId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for redis-broker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during instance lifecycle operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Instance '{0}' does not exist")]
    InstanceNotFound(InstanceId),

    #[error("Instance '{0}' already exists")]
    InstanceAlreadyExists(InstanceId),

    #[error("instance limit for this service has been reached")]
    CapacityExceeded,

    #[error("Invalid instance id: {0}")]
    InvalidInstanceId(String),

    #[error("Unknown plan '{0}'")]
    UnknownPlan(String),

    #[error("Filesystem error for instance '{instance}' at {}: {source}", .path.display())]
    Filesystem {
        instance: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state in {}: {reason}", .path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("Timed out after {timeout:?} waiting for {address} to accept connections")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("No pid recorded at {}: {reason}", .path.display())]
    PidUnavailable { path: PathBuf, reason: String },

    #[error("No process with pid {0}")]
    ProcessNotFound(i32),

    #[error("Process control error: {0}")]
    ProcessControl(String),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an io error with the instance and path it happened on.
    pub fn filesystem(
        instance: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Error::Filesystem {
            instance: instance.into(),
            path: path.into(),
            source,
        }
    }
}
