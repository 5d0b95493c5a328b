//! Relay daemon library
//!
//! Pieces of the `relayd` binary:
//! - Configuration loading
//! - Manifest loading into the in-memory store
//! - Logging setup

pub mod config;
pub mod error;
pub mod manifests;
pub mod telemetry;

pub use config::{DaemonConfig, LoggingConfig};
pub use error::{DaemonError, DaemonResult};
pub use manifests::{apply_manifests, read_manifests, LoadSummary, Manifest};
