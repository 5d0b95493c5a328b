//! Controller error types

use relay_store::StoreError;
use relay_types::ObjectKey;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned from a reconcile. The manager retries these with backoff.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not find Stage {0}")]
    StageNotFound(ObjectKey),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }
}

/// Result type for reconcile operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Failures preparing a Promotion before the engine runs. These end the
/// Promotion as Errored rather than being retried.
#[derive(Debug, Error)]
pub enum PromoteError {
    #[error("Freight {freight:?} not found in namespace {namespace:?}")]
    FreightNotFound { freight: String, namespace: String },

    #[error("Freight {freight:?} is not available to Stage {stage:?} in namespace {namespace:?}")]
    FreightNotAvailable {
        freight: String,
        stage: String,
        namespace: String,
    },

    #[error("error creating working directory {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors assembling a controller from its parts
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0} required")]
    Missing(&'static str),
}
