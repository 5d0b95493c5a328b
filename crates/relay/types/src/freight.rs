//! Freight: immutable bundles of artifact versions
//!
//! A [`Freight`] is produced by exactly one origin (a Warehouse) and is never
//! mutated after creation apart from its status, which records where it has
//! been approved and verified. Promoting Freight means attaching a
//! [`FreightReference`] to a Stage, never copying the Freight itself.

use crate::ids::ObjectMeta;
use crate::stage::VerificationInfo;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of resource that produced a piece of Freight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FreightOriginKind {
    #[default]
    Warehouse,
}

impl fmt::Display for FreightOriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreightOriginKind::Warehouse => write!(f, "Warehouse"),
        }
    }
}

/// Identity of the source that produced a piece of Freight
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreightOrigin {
    #[serde(default)]
    pub kind: FreightOriginKind,
    pub name: String,
}

impl FreightOrigin {
    pub fn warehouse(name: impl Into<String>) -> Self {
        Self {
            kind: FreightOriginKind::Warehouse,
            name: name.into(),
        }
    }
}

impl fmt::Display for FreightOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A specific commit in a Git repository
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A specific container image
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// A specific Helm chart version
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub version: String,
}

/// Where a piece of Freight has been approved or verified
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightStatus {
    /// Stages this Freight was manually approved for
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub approved_for: BTreeSet<String>,

    /// Stages in which this Freight passed verification
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub verified_in: BTreeSet<String>,
}

/// An immutable bundle of artifact versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Freight {
    pub metadata: ObjectMeta,

    /// Human-friendly alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub origin: FreightOrigin,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<GitCommit>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Chart>,

    #[serde(default)]
    pub status: FreightStatus,
}

impl Freight {
    pub fn new(metadata: ObjectMeta, origin: FreightOrigin) -> Self {
        Self {
            metadata,
            alias: None,
            origin,
            commits: Vec::new(),
            images: Vec::new(),
            charts: Vec::new(),
            status: FreightStatus::default(),
        }
    }

    /// Build the reference that is attached to Stages and Promotions.
    pub fn reference(&self) -> FreightReference {
        FreightReference {
            name: self.metadata.name.clone(),
            origin: self.origin.clone(),
            commits: self.commits.clone(),
            images: self.images.clone(),
            charts: self.charts.clone(),
        }
    }

    pub fn is_approved_for(&self, stage: &str) -> bool {
        self.status.approved_for.contains(stage)
    }

    pub fn is_verified_in(&self, stage: &str) -> bool {
        self.status.verified_in.contains(stage)
    }
}

/// A reference to a piece of Freight, with a copy of its artifact versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightReference {
    pub name: String,
    pub origin: FreightOrigin,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<GitCommit>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Chart>,
}

impl FreightReference {
    pub fn new(name: impl Into<String>, origin: FreightOrigin) -> Self {
        Self {
            name: name.into(),
            origin,
            commits: Vec::new(),
            images: Vec::new(),
            charts: Vec::new(),
        }
    }
}

/// The set of Freight references currently associated with a Stage, at
/// most one per origin.
///
/// Entries keep their insertion order: updating the reference for an
/// existing origin replaces it in place, new origins are appended. The
/// `freight` map serializes in that same order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightCollection {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default)]
    pub freight: OrderedFreight,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_history: Vec<VerificationInfo>,
}

impl FreightCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reference for `reference.origin`, or append it if the
    /// origin has no entry yet.
    pub fn update_or_push(&mut self, reference: FreightReference) {
        self.freight.upsert(reference);
        self.id = self.freight.digest();
    }

    pub fn get(&self, origin: &FreightOrigin) -> Option<&FreightReference> {
        self.freight.get(origin)
    }

    pub fn references(&self) -> impl Iterator<Item = &FreightReference> {
        self.freight.iter()
    }

    pub fn contains_freight(&self, name: &str) -> bool {
        self.freight.iter().any(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.freight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freight.is_empty()
    }
}

/// Insertion-ordered origin → reference map
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderedFreight(Vec<FreightReference>);

impl OrderedFreight {
    fn upsert(&mut self, reference: FreightReference) {
        match self.0.iter_mut().find(|r| r.origin == reference.origin) {
            Some(existing) => *existing = reference,
            None => self.0.push(reference),
        }
    }

    pub fn get(&self, origin: &FreightOrigin) -> Option<&FreightReference> {
        self.0.iter().find(|r| &r.origin == origin)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FreightReference> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic identifier for the set of referenced Freight,
    /// independent of insertion order.
    fn digest(&self) -> String {
        let mut names: Vec<&str> = self.0.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.join(",")
    }
}

impl Serialize for OrderedFreight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for reference in &self.0 {
            map.serialize_entry(&reference.origin.to_string(), reference)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderedFreight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedFreightVisitor;

        impl<'de> Visitor<'de> for OrderedFreightVisitor {
            type Value = OrderedFreight;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a map of origin to freight reference")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut freight = OrderedFreight::default();
                while let Some((_, reference)) = access.next_entry::<String, FreightReference>()? {
                    freight.upsert(reference);
                }
                Ok(freight)
            }
        }

        deserializer.deserialize_map(OrderedFreightVisitor)
    }
}
