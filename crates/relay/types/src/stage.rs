//! Stages: pipeline nodes that request Freight and admit Promotions

use crate::freight::{Freight, FreightCollection, FreightOrigin, FreightReference};
use crate::ids::ObjectMeta;
use crate::promotion::PromotionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a Stage may obtain Freight from a given origin
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightSources {
    /// Freight may come straight from the origin
    #[serde(default)]
    pub direct: bool,

    /// Freight may come from these upstream Stages once verified there
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<String>,
}

/// A Stage's request for Freight from one origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightRequest {
    pub origin: FreightOrigin,
    #[serde(default)]
    pub sources: FreightSources,
}

impl FreightRequest {
    pub fn direct(origin: FreightOrigin) -> Self {
        Self {
            origin,
            sources: FreightSources {
                direct: true,
                stages: Vec::new(),
            },
        }
    }
}

/// Verification settings for a Stage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analysis_templates: Vec<String>,
}

/// Record of one verification run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    #[serde(default)]
    pub requested_freight: Vec<FreightRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSpec>,
}

/// Pointer from a Stage to a Promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight: Option<FreightReference>,

    /// Snapshot of the Promotion's status when it finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PromotionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PromotionReference {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            freight: None,
            status: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    /// The only Promotion currently allowed to run against this Stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_promotion: Option<PromotionReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_promotion: Option<PromotionReference>,

    /// Freight collections this Stage has held, newest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub freight_history: Vec<FreightCollection>,
}

/// A pipeline node that requests Freight from one or more origins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: StageSpec,
    #[serde(default)]
    pub status: StageStatus,
}

impl Stage {
    pub fn new(metadata: ObjectMeta, spec: StageSpec) -> Self {
        Self {
            metadata,
            spec,
            status: StageStatus::default(),
        }
    }

    /// Name of the Promotion the Stage has admitted, if any.
    pub fn current_promotion_name(&self) -> Option<&str> {
        self.status
            .current_promotion
            .as_ref()
            .map(|p| p.name.as_str())
    }

    /// The Freight collection the Stage currently holds.
    pub fn current_freight(&self) -> Option<&FreightCollection> {
        self.status.freight_history.first()
    }

    /// Whether `freight` may be promoted into this Stage.
    ///
    /// Freight is available when it was approved for the Stage, or when the
    /// Stage requests its origin either directly or from an upstream Stage in
    /// which the Freight has been verified.
    pub fn is_freight_available(&self, freight: &Freight) -> bool {
        if freight.is_approved_for(&self.metadata.name) {
            return true;
        }
        self.spec
            .requested_freight
            .iter()
            .filter(|req| req.origin == freight.origin)
            .any(|req| {
                req.sources.direct || req.sources.stages.iter().any(|s| freight.is_verified_in(s))
            })
    }
}
