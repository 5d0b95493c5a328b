//! Promotion events
//!
//! Terminal phase transitions are announced through an [`EventSink`].
//! Delivery is fire-and-forget; the controller makes at most one call per
//! transition.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use relay_types::annotations::{
    create_actor, EVENT_ANNOTATION_ACTOR, EVENT_ANNOTATION_FREIGHT_ALIAS,
    EVENT_ANNOTATION_FREIGHT_CHARTS, EVENT_ANNOTATION_FREIGHT_COMMITS,
    EVENT_ANNOTATION_FREIGHT_IMAGES, EVENT_ANNOTATION_FREIGHT_NAME, EVENT_ANNOTATION_PROJECT,
    EVENT_ANNOTATION_PROMOTION_CREATE_TIME, EVENT_ANNOTATION_PROMOTION_NAME,
    EVENT_ANNOTATION_STAGE_NAME,
};
use relay_types::{Freight, ObjectKey, ObjectMeta, Promotion, Uid};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => f.write_str("Normal"),
            EventType::Warning => f.write_str("Warning"),
        }
    }
}

/// An emitted event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub object: ObjectKey,
    pub uid: Uid,
    pub annotations: BTreeMap<String, String>,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Receives events about objects
pub trait EventSink: Send + Sync {
    fn emit_annotated(
        &self,
        object: &ObjectMeta,
        annotations: BTreeMap<String, String>,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit_annotated(
        &self,
        object: &ObjectMeta,
        annotations: BTreeMap<String, String>,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let annotations = serde_json::to_string(&annotations).unwrap_or_default();
        match event_type {
            EventType::Normal => {
                info!(object = %object.key(), reason, %annotations, "{}", message)
            }
            EventType::Warning => {
                warn!(object = %object.key(), reason, %annotations, "{}", message)
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit_annotated(
        &self,
        object: &ObjectMeta,
        annotations: BTreeMap<String, String>,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.events.lock().push(Event {
            object: object.key(),
            uid: object.uid,
            annotations,
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Annotations describing a Promotion and its Freight.
///
/// The actor is whoever created the Promotion when that is known,
/// otherwise `default_actor`. Without either the actor is left out.
pub fn promotion_annotations(
    default_actor: Option<&str>,
    promotion: &Promotion,
    freight: Option<&Freight>,
) -> BTreeMap<String, String> {
    let meta = &promotion.metadata;
    let mut annotations = BTreeMap::from([
        (EVENT_ANNOTATION_PROJECT.to_string(), meta.namespace.clone()),
        (EVENT_ANNOTATION_PROMOTION_NAME.to_string(), meta.name.clone()),
        (
            EVENT_ANNOTATION_PROMOTION_CREATE_TIME.to_string(),
            meta.creation_timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (EVENT_ANNOTATION_STAGE_NAME.to_string(), promotion.spec.stage.clone()),
        (EVENT_ANNOTATION_FREIGHT_NAME.to_string(), promotion.spec.freight.clone()),
    ]);

    let actor = create_actor(&meta.annotations)
        .or_else(|| default_actor.map(str::to_string))
        .filter(|a| !a.is_empty());
    if let Some(actor) = actor {
        annotations.insert(EVENT_ANNOTATION_ACTOR.to_string(), actor);
    }

    if let Some(freight) = freight {
        if let Some(alias) = &freight.alias {
            annotations.insert(EVENT_ANNOTATION_FREIGHT_ALIAS.to_string(), alias.clone());
        }
        insert_json(&mut annotations, EVENT_ANNOTATION_FREIGHT_COMMITS, &freight.commits);
        insert_json(&mut annotations, EVENT_ANNOTATION_FREIGHT_IMAGES, &freight.images);
        insert_json(&mut annotations, EVENT_ANNOTATION_FREIGHT_CHARTS, &freight.charts);
    }

    annotations
}

fn insert_json<T: Serialize>(annotations: &mut BTreeMap<String, String>, key: &str, items: &[T]) {
    if items.is_empty() {
        return;
    }
    if let Ok(value) = serde_json::to_string(items) {
        annotations.insert(key.to_string(), value);
    }
}
