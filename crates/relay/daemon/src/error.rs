//! Error types for relay-daemon

use relay_controller::{BuildError, ReconcileError};
use relay_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but holds an unusable value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A manifest file could not be read
    #[error("Failed to read manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest file could not be parsed
    #[error("Invalid manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    /// Store error while loading manifests
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Controller could not be assembled
    #[error("Controller error: {0}")]
    Build(#[from] BuildError),

    /// Controller stopped with an error
    #[error("Controller error: {0}")]
    Controller(#[from] ReconcileError),
}

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
