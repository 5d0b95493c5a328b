//! Relay Promotion controller
//!
//! Moves Promotions through their lifecycle:
//!
//! ```text
//! (new) -> Pending -> Running -> Succeeded | Failed | Errored
//!             \          \
//!              +----------+--> Aborted
//! ```
//!
//! A Promotion waits in Pending until its Stage admits it, then its steps are
//! executed by an [`Engine`](relay_engine::Engine) inside a private working
//! directory. Running Promotions are re-polled until the engine reports a
//! terminal outcome; terminal Promotions are never touched again.
//!
//! # Components
//!
//! - [`PromotionReconciler`]: reconciles a single Promotion
//! - [`PromotionReconcilerBuilder`]: assembles a reconciler from its parts
//! - [`Manager`]: feeds store changes to the reconciler through a [`WorkQueue`]
//! - [`EventSink`]: receives an event for every terminal transition

pub mod abort;
pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod freight_collection;
pub mod manager;
pub mod predicates;
pub mod queue;
pub mod reconciler;
pub mod requeue;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use builder::PromotionReconcilerBuilder;
pub use config::ControllerConfig;
pub use error::{BuildError, PromoteError, ReconcileError, Result};
pub use events::{Event, EventSink, EventType, RecordingEventSink, TracingEventSink};
pub use manager::Manager;
pub use predicates::ShardFilter;
pub use queue::WorkQueue;
pub use reconciler::{PromotionReconciler, ReconcileOutcome};
pub use workspace::{Workspace, WorkspaceManager, WorkspaceState};
