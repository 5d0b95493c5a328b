//! In-memory object store
//!
//! Keeps every resource in concurrent maps, stamps each write with a
//! monotonically increasing resource version and broadcasts changes to
//! watchers. Suitable for development, tests and single-process daemons.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_types::annotations::ANNOTATION_KEY_REVERIFY;
use relay_types::{Freight, ObjectKey, ObjectMeta, Promotion, PromotionStatus, Stage, Uid};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::ObjectStore;
use crate::validation::validate_promotion_status;
use crate::watch::{Change, WatchEvent};

/// Buffered change notifications per watcher before it starts lagging
const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// In-memory implementation of [`ObjectStore`]
pub struct InMemoryObjectStore {
    promotions: DashMap<ObjectKey, Promotion>,
    stages: DashMap<ObjectKey, Stage>,
    freight: DashMap<ObjectKey, Freight>,
    version: AtomicU64,
    available: AtomicBool,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            promotions: DashMap::new(),
            stages: DashMap::new(),
            freight: DashMap::new(),
            version: AtomicU64::new(0),
            available: AtomicBool::new(true),
            events,
        }
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Create a Promotion. Fails if one with the same key exists.
    pub fn create_promotion(&self, mut promotion: Promotion) -> Result<Promotion> {
        self.check_available()?;
        let key = promotion.metadata.key();
        match self.promotions.entry(key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(key)),
            Entry::Vacant(slot) => {
                self.admit(&mut promotion.metadata, None);
                slot.insert(promotion.clone());
            }
        }
        debug!(promotion = %key, "created Promotion");
        self.publish(WatchEvent::Promotion(Change::created(promotion.clone())));
        Ok(promotion)
    }

    /// Set an annotation on a Promotion.
    pub fn annotate_promotion(
        &self,
        key: &ObjectKey,
        annotation: &str,
        value: &str,
    ) -> Result<Promotion> {
        self.check_available()?;
        let (old, new) = {
            let mut entry = self
                .promotions
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            let old = entry.clone();
            entry
                .metadata
                .annotations
                .insert(annotation.to_string(), value.to_string());
            entry.metadata.resource_version = self.next_version();
            (old, entry.clone())
        };
        self.publish(WatchEvent::Promotion(Change::updated(old, new.clone())));
        Ok(new)
    }

    /// Delete a Promotion, returning it if it existed.
    pub fn delete_promotion(&self, key: &ObjectKey) -> Result<Option<Promotion>> {
        self.check_available()?;
        let removed = self.promotions.remove(key).map(|(_, p)| p);
        if let Some(p) = &removed {
            self.publish(WatchEvent::Promotion(Change::deleted(p.clone())));
        }
        Ok(removed)
    }

    /// Create or replace a Stage.
    pub fn put_stage(&self, mut stage: Stage) -> Result<Stage> {
        self.check_available()?;
        let key = stage.metadata.key();
        let previous = self.stages.get(&key).map(|s| s.clone());
        self.admit(&mut stage.metadata, previous.as_ref().map(|s| &s.metadata));
        self.stages.insert(key, stage.clone());
        let change = match previous {
            Some(old) => Change::updated(old, stage.clone()),
            None => Change::created(stage.clone()),
        };
        self.publish(WatchEvent::Stage(change));
        Ok(stage)
    }

    /// Create or replace a Freight.
    pub fn put_freight(&self, mut freight: Freight) -> Result<Freight> {
        self.check_available()?;
        let key = freight.metadata.key();
        let previous = self.freight.get(&key).map(|f| f.clone());
        self.admit(&mut freight.metadata, previous.as_ref().map(|f| &f.metadata));
        self.freight.insert(key, freight.clone());
        let change = match previous {
            Some(old) => Change::updated(old, freight.clone()),
            None => Change::created(freight.clone()),
        };
        self.publish(WatchEvent::Freight(change));
        Ok(freight)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stamp identity and version onto an incoming object. Replacements keep
    /// the identity of the object they replace.
    fn admit(&self, meta: &mut ObjectMeta, previous: Option<&ObjectMeta>) {
        match previous {
            Some(prev) => {
                meta.uid = prev.uid;
                meta.creation_timestamp = prev.creation_timestamp;
                meta.generation = prev.generation + 1;
            }
            None => {
                if meta.uid.is_nil() {
                    meta.uid = Uid::generate();
                }
                meta.generation = 1;
            }
        }
        meta.resource_version = self.next_version();
    }

    fn publish(&self, event: WatchEvent) {
        // Having no watchers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_promotion(&self, key: &ObjectKey) -> Result<Option<Promotion>> {
        self.check_available()?;
        Ok(self.promotions.get(key).map(|p| p.clone()))
    }

    async fn list_promotions(&self) -> Result<Vec<Promotion>> {
        self.check_available()?;
        let mut all: Vec<Promotion> = self.promotions.iter().map(|p| p.clone()).collect();
        all.sort_by(|a, b| a.metadata.key().cmp(&b.metadata.key()));
        Ok(all)
    }

    async fn get_stage(&self, key: &ObjectKey) -> Result<Option<Stage>> {
        self.check_available()?;
        Ok(self.stages.get(key).map(|s| s.clone()))
    }

    async fn get_freight(&self, key: &ObjectKey) -> Result<Option<Freight>> {
        self.check_available()?;
        Ok(self.freight.get(key).map(|f| f.clone()))
    }

    async fn update_promotion_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: PromotionStatus,
    ) -> Result<u64> {
        self.check_available()?;
        let (old, new) = {
            let mut entry = self
                .promotions
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;

            let actual = entry.metadata.resource_version;
            if actual != expected_version {
                return Err(StoreError::Conflict {
                    key: key.clone(),
                    expected: expected_version,
                    actual,
                });
            }
            validate_promotion_status(&entry.spec, &status).map_err(|reason| {
                StoreError::Invalid {
                    key: key.clone(),
                    reason,
                }
            })?;

            let old = entry.clone();
            entry.status = status;
            entry.metadata.resource_version = self.next_version();
            (old, entry.clone())
        };

        let version = new.metadata.resource_version;
        self.publish(WatchEvent::Promotion(Change::updated(old, new)));
        Ok(version)
    }

    async fn request_stage_reverification(&self, key: &ObjectKey) -> Result<()> {
        self.check_available()?;
        let (old, new) = {
            let mut entry = self
                .stages
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;

            let verification_id = entry
                .current_freight()
                .and_then(|c| c.verification_history.first())
                .map(|v| v.id.clone())
                .ok_or_else(|| StoreError::Invalid {
                    key: key.clone(),
                    reason: "stage has no verification to repeat".into(),
                })?;

            let old = entry.clone();
            entry.metadata.annotations.insert(
                ANNOTATION_KEY_REVERIFY.to_string(),
                format!("{}@{}", verification_id, Utc::now().timestamp_millis()),
            );
            entry.metadata.resource_version = self.next_version();
            (old, entry.clone())
        };
        self.publish(WatchEvent::Stage(Change::updated(old, new)));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
