//! Change notifications emitted by an object store

use relay_types::{Freight, ObjectMeta, Promotion, Stage};

/// What happened to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A single observed change, with the previous value when there was one
#[derive(Debug, Clone)]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub old: Option<T>,
    pub new: T,
}

impl<T> Change<T> {
    pub fn created(new: T) -> Self {
        Self {
            kind: ChangeKind::Created,
            old: None,
            new,
        }
    }

    pub fn updated(old: T, new: T) -> Self {
        Self {
            kind: ChangeKind::Updated,
            old: Some(old),
            new,
        }
    }

    /// For deletions `new` holds the last known value.
    pub fn deleted(last: T) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            old: None,
            new: last,
        }
    }
}

/// A change to any resource kind held by the store
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Promotion(Change<Promotion>),
    Stage(Change<Stage>),
    Freight(Change<Freight>),
}

impl WatchEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            WatchEvent::Promotion(c) => c.kind,
            WatchEvent::Stage(c) => c.kind,
            WatchEvent::Freight(c) => c.kind,
        }
    }

    /// Metadata of the object as it is after the change.
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            WatchEvent::Promotion(c) => &c.new.metadata,
            WatchEvent::Stage(c) => &c.new.metadata,
            WatchEvent::Freight(c) => &c.new.metadata,
        }
    }
}
