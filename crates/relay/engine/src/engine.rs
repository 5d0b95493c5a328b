//! The engine contract consumed by the promotion controller

use async_trait::async_trait;
use relay_types::{
    ExpressionVariable, FreightCollection, FreightReference, FreightRequest, HealthCheckStep,
    PromotionPhase, State, StepExecutionMetadata,
};
use std::path::PathBuf;

use crate::error::Result;
use crate::step::Step;

/// Inputs of one engine invocation
#[derive(Debug, Clone)]
pub struct PromotionContext {
    pub ui_base_url: String,
    /// Directory exclusively owned by this Promotion
    pub workspace: PathBuf,
    /// Namespace of the Promotion
    pub project: String,
    pub stage: String,
    pub promotion: String,
    /// Origins requested by the Stage
    pub freight_requests: Vec<FreightRequest>,
    /// Merged per-origin view for the Stage
    pub freight: FreightCollection,
    pub target_freight: FreightReference,
    /// Index of the step to resume at
    pub start_from_step: usize,
    pub step_execution_metadata: Vec<StepExecutionMetadata>,
    pub state: State,
    pub vars: Vec<ExpressionVariable>,
    /// Who created the Promotion, when known
    pub actor: Option<String>,
}

/// What an engine invocation produced
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionResult {
    pub status: PromotionPhase,
    pub message: Option<String>,
    pub current_step: usize,
    pub step_execution_metadata: Vec<StepExecutionMetadata>,
    pub state: State,
    /// Health checks emitted by steps that ran during this invocation
    pub health_checks: Vec<HealthCheckStep>,
}

/// Executes an ordered list of steps.
///
/// A Running result means the engine should be invoked again later with the
/// returned step index, metadata and state.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn promote(&self, ctx: &PromotionContext, steps: &[Step]) -> Result<PromotionResult>;
}
