//! Engine error types

use thiserror::Error;

/// Errors raised by an [`Engine`](crate::Engine) itself, as opposed to the
/// outcome of the steps it runs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot start at step {start}: promotion has only {steps} steps")]
    InvalidStartStep { start: usize, steps: usize },

    #[error("step runner already registered for kind {0:?}")]
    DuplicateRunner(String),

    #[error("engine error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by a [`StepRunner`](crate::StepRunner).
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// May succeed on a later attempt; counts against the error threshold
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help
    #[error("{0}")]
    Terminal(String),

    #[error("invalid step configuration: {0}")]
    InvalidConfig(String),
}

impl StepError {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepError::Transient(_))
    }
}

/// Errors looking up credentials
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("credentials backend unavailable: {0}")]
    Unavailable(String),
}
