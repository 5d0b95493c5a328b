//! Object store error types

use relay_types::ObjectKey;
use thiserror::Error;

/// Object store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The write was computed against a stale read
    #[error("conflict writing {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    /// The write was rejected by schema validation
    #[error("invalid status for {key}: {reason}")]
    Invalid { key: ObjectKey, reason: String },

    #[error("not found: {0}")]
    NotFound(ObjectKey),

    #[error("already exists: {0}")]
    AlreadyExists(ObjectKey),

    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, StoreError::Invalid { .. })
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::Unavailable(_)
        )
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
