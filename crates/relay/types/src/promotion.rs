//! Promotions: requests to move one Freight into one Stage
//!
//! The spec of a Promotion is immutable after creation. Its status is owned
//! by the promotion controller and patched repeatedly until the phase becomes
//! terminal, after which it never changes again.

use crate::freight::{FreightCollection, FreightReference};
use crate::ids::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque key-value state shared between steps and across resumptions
pub type State = serde_json::Map<String, serde_json::Value>;

/// Lifecycle phase of a Promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromotionPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Errored,
    Aborted,
}

impl PromotionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PromotionPhase::Succeeded
                | PromotionPhase::Failed
                | PromotionPhase::Errored
                | PromotionPhase::Aborted
        )
    }
}

impl fmt::Display for PromotionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PromotionPhase::Pending => "Pending",
            PromotionPhase::Running => "Running",
            PromotionPhase::Succeeded => "Succeeded",
            PromotionPhase::Failed => "Failed",
            PromotionPhase::Errored => "Errored",
            PromotionPhase::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// Execution status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Errored,
    Aborted,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Retry behaviour of a step
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Soft deadline for the step, measured from its first attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Consecutive errors tolerated before the step is considered errored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_threshold: Option<u32>,
}

impl RetryPolicy {
    pub const DEFAULT_ERROR_THRESHOLD: u32 = 1;

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    pub fn error_threshold(&self) -> u32 {
        match self.error_threshold {
            Some(0) | None => Self::DEFAULT_ERROR_THRESHOLD,
            Some(n) => n,
        }
    }
}

/// A named variable available to steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionVariable {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// One step of a Promotion as declared by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionStep {
    /// Kind of step, resolved against the step runner registry
    pub uses: String,

    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,

    #[serde(default)]
    pub continue_on_error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<ExpressionVariable>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl PromotionStep {
    pub fn uses(kind: impl Into<String>) -> Self {
        Self {
            uses: kind.into(),
            alias: None,
            guard: None,
            continue_on_error: false,
            retry: None,
            vars: Vec::new(),
            config: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionSpec {
    /// Name of the Stage being promoted into
    pub stage: String,

    /// Name of the Freight being promoted
    pub freight: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<ExpressionVariable>,

    #[serde(default)]
    pub steps: Vec<PromotionStep>,
}

/// Per-step execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,

    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepExecutionMetadata {
    pub fn started(alias: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            alias: alias.into(),
            status: StepStatus::Running,
            started_at: Some(at),
            finished_at: None,
            error_count: 0,
            message: None,
        }
    }
}

/// Post-promotion health check declared by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckStep {
    pub uses: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionStatus {
    /// Absent until the controller first observes the Promotion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PromotionPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub current_step: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_execution_metadata: Vec<StepExecutionMetadata>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub state: State,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight: Option<FreightReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight_collection: Option<FreightCollection>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<HealthCheckStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handled_refresh: Option<String>,
}

impl PromotionStatus {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_some_and(|p| p.is_terminal())
    }
}

/// A request to move one Freight through one Stage via ordered steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub metadata: ObjectMeta,
    pub spec: PromotionSpec,
    #[serde(default)]
    pub status: PromotionStatus,
}

impl Promotion {
    pub fn new(metadata: ObjectMeta, spec: PromotionSpec) -> Self {
        Self {
            metadata,
            spec,
            status: PromotionStatus::default(),
        }
    }
}
