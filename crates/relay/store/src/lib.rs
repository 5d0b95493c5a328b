//! Relay object store
//!
//! The [`ObjectStore`] trait is the persistence seam of the controllers:
//! versioned reads, compare-and-swap status writes and a change feed. The
//! [`InMemoryObjectStore`] implements it for development and tests.

pub mod error;
pub mod memory;
pub mod traits;
pub mod validation;
pub mod watch;

pub use error::{Result, StoreError};
pub use memory::InMemoryObjectStore;
pub use traits::ObjectStore;
pub use validation::{validate_promotion_status, MAX_MESSAGE_LENGTH};
pub use watch::{Change, ChangeKind, WatchEvent};
