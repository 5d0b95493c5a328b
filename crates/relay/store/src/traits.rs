//! Object store contract consumed by the controllers

use async_trait::async_trait;
use relay_types::{Freight, ObjectKey, Promotion, PromotionStatus, Stage};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::watch::WatchEvent;

/// Versioned store of Relay resources.
///
/// Reads return `Ok(None)` for objects that do not exist. Status writes are
/// compare-and-swap on the object's resource version: a write computed
/// against a stale read fails with [`StoreError::Conflict`] rather than
/// overwriting a newer value.
///
/// [`StoreError::Conflict`]: crate::StoreError::Conflict
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a Promotion by key
    async fn get_promotion(&self, key: &ObjectKey) -> Result<Option<Promotion>>;

    /// List every Promotion, in key order
    async fn list_promotions(&self) -> Result<Vec<Promotion>>;

    /// Get a Stage by key
    async fn get_stage(&self, key: &ObjectKey) -> Result<Option<Stage>>;

    /// Get a Freight by key
    async fn get_freight(&self, key: &ObjectKey) -> Result<Option<Freight>>;

    /// Replace a Promotion's status if its resource version still equals
    /// `expected_version`. Returns the new resource version.
    async fn update_promotion_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: PromotionStatus,
    ) -> Result<u64>;

    /// Ask the Stage to verify its current Freight again
    async fn request_stage_reverification(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to changes made after this call
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
