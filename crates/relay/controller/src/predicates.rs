//! Which store changes should trigger a reconcile, and of which Promotion

use relay_store::{Change, ChangeKind, WatchEvent};
use relay_types::annotations::{ANNOTATION_KEY_ABORT, ANNOTATION_KEY_REFRESH, LABEL_KEY_SHARD};
use relay_types::{ObjectKey, ObjectMeta, Promotion, Stage};

use crate::config::ControllerConfig;

/// Decides whether an object belongs to this controller's shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFilter {
    shard: Option<String>,
    is_default: bool,
}

impl ShardFilter {
    pub fn new(shard: Option<String>, is_default: bool) -> Self {
        Self {
            shard: shard.filter(|s| !s.is_empty()),
            is_default,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.shard_name.clone(), config.is_default_controller)
    }

    /// Labeled objects belong to the shard they name; unlabeled objects to
    /// the default controller.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        match meta.labels.get(LABEL_KEY_SHARD).filter(|l| !l.is_empty()) {
            Some(label) => self.shard.as_deref() == Some(label.as_str()),
            None => self.is_default,
        }
    }
}

/// The Promotions to reconcile in response to `event`.
pub fn keys_to_enqueue(event: &WatchEvent, filter: &ShardFilter) -> Vec<ObjectKey> {
    match event {
        WatchEvent::Promotion(change) => {
            if filter.matches(&change.new.metadata) && promotion_changed(change) {
                vec![change.new.metadata.key()]
            } else {
                vec![]
            }
        }
        WatchEvent::Stage(change) => {
            if !filter.matches(&change.new.metadata) {
                return vec![];
            }
            stage_admitted_promotion(change)
                .map(|name| vec![ObjectKey::new(&change.new.metadata.namespace, name)])
                .unwrap_or_default()
        }
        WatchEvent::Freight(_) => vec![],
    }
}

/// Creates always count. Updates count when the spec changed or a refresh or
/// abort was requested; status writes alone do not.
///
/// A refresh is requested by adding or changing the refresh annotation.
/// Whether the token was already handled is decided by the reconciler from
/// `lastHandledRefresh`, so status writes made before the token is recorded
/// do not re-enqueue the Promotion.
fn promotion_changed(change: &Change<Promotion>) -> bool {
    match (change.kind, &change.old) {
        (ChangeKind::Created, _) => true,
        (ChangeKind::Deleted, _) => false,
        (ChangeKind::Updated, None) => true,
        (ChangeKind::Updated, Some(old)) => {
            let (old, new) = (&old.metadata, &change.new.metadata);
            old.generation != new.generation
                || old.annotations.get(ANNOTATION_KEY_REFRESH)
                    != new.annotations.get(ANNOTATION_KEY_REFRESH)
                || old.annotations.get(ANNOTATION_KEY_ABORT)
                    != new.annotations.get(ANNOTATION_KEY_ABORT)
        }
    }
}

/// Name of the Promotion a Stage update newly admitted, if any.
fn stage_admitted_promotion(change: &Change<Stage>) -> Option<&str> {
    if change.kind != ChangeKind::Updated {
        return None;
    }
    let new = change.new.current_promotion_name()?;
    let old = change.old.as_ref().and_then(|s| s.current_promotion_name());
    (old != Some(new)).then_some(new)
}
