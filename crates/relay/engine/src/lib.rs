//! Relay promotion engine
//!
//! The [`Engine`] executes the ordered steps of a Promotion. Step kinds are
//! resolved through an explicit [`StepRunnerRegistry`] built at startup;
//! [`LocalEngine`] runs them sequentially in-process.
//!
//! Steps that talk to repositories obtain credentials through a
//! [`CredentialsDatabase`].

pub mod builtin;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod local;
pub mod runner;
pub mod step;

pub use credentials::{
    CredentialSecret, CredentialType, Credentials, CredentialsConfig, CredentialsDatabase,
    InMemoryCredentialsDatabase,
};
pub use engine::{Engine, PromotionContext, PromotionResult};
pub use error::{CredentialsError, EngineError, Result, StepError};
pub use local::LocalEngine;
pub use runner::{StepContext, StepResult, StepRunner, StepRunnerRegistry};
pub use step::Step;
