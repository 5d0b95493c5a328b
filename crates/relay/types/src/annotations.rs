//! Well-known annotation and label keys, and parsers for their values

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Requests termination of a Promotion
pub const ANNOTATION_KEY_ABORT: &str = "relay.dev/abort";

/// Requests a fresh reconcile; the value is an opaque token
pub const ANNOTATION_KEY_REFRESH: &str = "relay.dev/refresh";

/// Who created the resource, as `kind:name` or a bare name
pub const ANNOTATION_KEY_CREATE_ACTOR: &str = "relay.dev/create-actor";

/// Set on a Stage to request re-verification of its current Freight
pub const ANNOTATION_KEY_REVERIFY: &str = "relay.dev/reverify";

/// Assigns a resource to a controller shard
pub const LABEL_KEY_SHARD: &str = "relay.dev/shard";

pub const EVENT_ANNOTATION_PROJECT: &str = "event.relay.dev/project";
pub const EVENT_ANNOTATION_PROMOTION_NAME: &str = "event.relay.dev/promotion-name";
pub const EVENT_ANNOTATION_PROMOTION_CREATE_TIME: &str = "event.relay.dev/promotion-create-time";
pub const EVENT_ANNOTATION_STAGE_NAME: &str = "event.relay.dev/stage-name";
pub const EVENT_ANNOTATION_FREIGHT_NAME: &str = "event.relay.dev/freight-name";
pub const EVENT_ANNOTATION_FREIGHT_ALIAS: &str = "event.relay.dev/freight-alias";
pub const EVENT_ANNOTATION_FREIGHT_COMMITS: &str = "event.relay.dev/freight-commits";
pub const EVENT_ANNOTATION_FREIGHT_IMAGES: &str = "event.relay.dev/freight-images";
pub const EVENT_ANNOTATION_FREIGHT_CHARTS: &str = "event.relay.dev/freight-charts";
pub const EVENT_ANNOTATION_ACTOR: &str = "event.relay.dev/actor";
pub const EVENT_ANNOTATION_VERIFICATION_PENDING: &str = "event.relay.dev/verification-pending";

pub const EVENT_REASON_PROMOTION_SUCCEEDED: &str = "PromotionSucceeded";
pub const EVENT_REASON_PROMOTION_FAILED: &str = "PromotionFailed";
pub const EVENT_REASON_PROMOTION_ERRORED: &str = "PromotionErrored";
pub const EVENT_REASON_PROMOTION_ABORTED: &str = "PromotionAborted";

/// Actor value recorded when the creator could not be determined
pub const EVENT_ACTOR_UNKNOWN: &str = "unknown";

const EVENT_ACTOR_CONTROLLER_PREFIX: &str = "controller:";

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("invalid abort request in annotation {key}: {source}")]
    InvalidAbortRequest {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Action requested through the abort annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortAction {
    Terminate,
}

/// Out-of-band request to abort a Promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortPromotionRequest {
    pub action: AbortAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl AbortPromotionRequest {
    pub fn terminate(actor: Option<String>) -> Self {
        Self {
            action: AbortAction::Terminate,
            actor,
        }
    }

    /// Encode as an annotation value.
    pub fn to_annotation_value(&self) -> String {
        // Serializing a struct of strings and unit enums cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse the abort request annotation, if present.
pub fn abort_request(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<AbortPromotionRequest>, AnnotationError> {
    match annotations.get(ANNOTATION_KEY_ABORT) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|source| AnnotationError::InvalidAbortRequest {
                key: ANNOTATION_KEY_ABORT,
                source,
            }),
    }
}

/// The refresh token, if a refresh was requested.
pub fn refresh_token(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations
        .get(ANNOTATION_KEY_REFRESH)
        .map(String::as_str)
        .filter(|t| !t.is_empty())
}

/// Identity of whoever created the resource.
///
/// A value of the form `kind:name` yields `name`; the `unknown` sentinel is
/// treated as absent.
pub fn create_actor(annotations: &BTreeMap<String, String>) -> Option<String> {
    let value = annotations.get(ANNOTATION_KEY_CREATE_ACTOR)?;
    let mut parts = value.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(name), None) => Some(name.to_string()),
        _ if value == EVENT_ACTOR_UNKNOWN || value.is_empty() => None,
        _ => Some(value.clone()),
    }
}

/// Actor string used for events raised by a controller itself.
pub fn controller_actor(controller_name: &str) -> String {
    format!("{EVENT_ACTOR_CONTROLLER_PREFIX}{controller_name}")
}
