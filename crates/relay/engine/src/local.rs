//! Sequential in-process engine
//!
//! Runs steps one after another starting at the requested index. A step
//! that reports Running, or fails below its error threshold, pauses the
//! Promotion; the next invocation resumes at the same step with the
//! metadata and shared state returned from this one.

use async_trait::async_trait;
use chrono::Utc;
use relay_types::{HealthCheckStep, PromotionPhase, State, StepExecutionMetadata, StepStatus};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::credentials::{CredentialsConfig, CredentialsDatabase, InMemoryCredentialsDatabase};
use crate::engine::{Engine, PromotionContext, PromotionResult};
use crate::error::{EngineError, Result};
use crate::runner::{StepContext, StepRunnerRegistry};
use crate::step::Step;

/// Outcome of one step within an invocation
enum StepOutcome {
    /// Move on to the following step
    Next,
    /// Come back to this step later
    Pause(Option<String>),
    /// The Promotion ends here with the given phase
    Halt(PromotionPhase, String),
}

/// Engine that executes steps in-process using a [`StepRunnerRegistry`]
pub struct LocalEngine {
    registry: Arc<StepRunnerRegistry>,
    credentials: Arc<dyn CredentialsDatabase>,
}

impl LocalEngine {
    /// Create an engine whose steps see an empty credentials database
    pub fn new(registry: Arc<StepRunnerRegistry>) -> Self {
        Self {
            registry,
            credentials: Arc::new(InMemoryCredentialsDatabase::new(CredentialsConfig::default())),
        }
    }

    /// Hand `credentials` to every step this engine runs
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsDatabase>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn registry(&self) -> &StepRunnerRegistry {
        &self.registry
    }

    async fn run_step(
        &self,
        ctx: &PromotionContext,
        step: &Step,
        meta: &mut StepExecutionMetadata,
        state: &mut State,
        health_checks: &mut Vec<HealthCheckStep>,
    ) -> StepOutcome {
        let now = Utc::now();
        meta.status = StepStatus::Running;
        let started_at = *meta.started_at.get_or_insert(now);

        match evaluate_guard(step.guard.as_deref()) {
            Ok(true) => {}
            Ok(false) => {
                debug!(step = %step.alias, "guard is false, skipping step");
                meta.status = StepStatus::Skipped;
                meta.finished_at = Some(now);
                return StepOutcome::Next;
            }
            Err(message) => return halt(step, meta, StepStatus::Errored, message),
        }

        let Some(runner) = self.registry.get(&step.kind) else {
            return halt(
                step,
                meta,
                StepStatus::Errored,
                format!("no runner registered for step kind {:?}", step.kind),
            );
        };

        if let Some(timeout) = step.timeout(Some(runner.as_ref())) {
            let elapsed = (now - started_at).to_std().unwrap_or_default();
            if elapsed >= timeout {
                return halt(
                    step,
                    meta,
                    StepStatus::Errored,
                    format!("step timed out after {}s", timeout.as_secs()),
                );
            }
        }

        let step_ctx = StepContext {
            project: ctx.project.clone(),
            stage: ctx.stage.clone(),
            promotion: ctx.promotion.clone(),
            workspace: ctx.workspace.clone(),
            alias: step.alias.clone(),
            config: step.config.clone(),
            vars: ctx.vars.iter().chain(step.vars.iter()).cloned().collect(),
            shared_state: state.clone(),
            started_at,
            attempt_errors: meta.error_count,
            credentials: Arc::clone(&self.credentials),
        };

        match runner.run(&step_ctx).await {
            Ok(result) => match result.status {
                StepStatus::Succeeded | StepStatus::Skipped => {
                    meta.status = result.status;
                    meta.finished_at = Some(Utc::now());
                    meta.message = result.message;
                    if let Some(output) = result.output {
                        state.insert(step.alias.clone(), output);
                    }
                    health_checks.extend(result.health_check);
                    StepOutcome::Next
                }
                StepStatus::Pending | StepStatus::Running => {
                    meta.message = result.message.clone();
                    StepOutcome::Pause(result.message)
                }
                status @ (StepStatus::Failed | StepStatus::Errored | StepStatus::Aborted) => {
                    let message = result
                        .message
                        .unwrap_or_else(|| format!("step reported {status}"));
                    halt(step, meta, status, message)
                }
            },
            Err(err) => {
                meta.error_count += 1;
                let threshold = step.error_threshold();
                if err.is_terminal() || meta.error_count >= threshold {
                    halt(step, meta, StepStatus::Errored, err.to_string())
                } else {
                    warn!(
                        step = %step.alias,
                        errors = meta.error_count,
                        threshold,
                        error = %err,
                        "step error below threshold, will retry"
                    );
                    meta.message = Some(err.to_string());
                    StepOutcome::Pause(Some(err.to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl Engine for LocalEngine {
    #[instrument(skip_all, fields(project = %ctx.project, promotion = %ctx.promotion, start = ctx.start_from_step))]
    async fn promote(&self, ctx: &PromotionContext, steps: &[Step]) -> Result<PromotionResult> {
        let start = ctx.start_from_step;
        if start > steps.len() {
            return Err(EngineError::InvalidStartStep {
                start,
                steps: steps.len(),
            });
        }
        if ctx.step_execution_metadata.len() < start {
            return Err(EngineError::Internal(format!(
                "resuming at step {start} with metadata for only {} steps",
                ctx.step_execution_metadata.len()
            )));
        }

        let mut metadata = ctx.step_execution_metadata.clone();
        metadata.truncate(start + 1);
        let mut state = ctx.state.clone();
        let mut health_checks = Vec::new();

        for (index, step) in steps.iter().enumerate().skip(start) {
            if metadata.len() == index {
                metadata.push(StepExecutionMetadata::started(&step.alias, Utc::now()));
            }
            let outcome = self
                .run_step(ctx, step, &mut metadata[index], &mut state, &mut health_checks)
                .await;

            let (status, message) = match outcome {
                StepOutcome::Next => continue,
                StepOutcome::Pause(message) => (PromotionPhase::Running, message),
                StepOutcome::Halt(phase, message) => (phase, Some(message)),
            };
            debug!(step = %step.alias, index, %status, "promotion paused or halted");
            return Ok(PromotionResult {
                status,
                message,
                current_step: index,
                step_execution_metadata: metadata,
                state,
                health_checks,
            });
        }

        Ok(PromotionResult {
            status: PromotionPhase::Succeeded,
            message: None,
            current_step: steps.len(),
            step_execution_metadata: metadata,
            state,
            health_checks,
        })
    }
}

/// Record a terminal step status. Steps that continue on error let the
/// Promotion proceed.
fn halt(
    step: &Step,
    meta: &mut StepExecutionMetadata,
    status: StepStatus,
    message: String,
) -> StepOutcome {
    meta.status = status;
    meta.finished_at = Some(Utc::now());
    meta.message = Some(message.clone());

    if step.continue_on_error {
        debug!(step = %step.alias, %status, "continuing past step error");
        return StepOutcome::Next;
    }

    let phase = match status {
        StepStatus::Failed => PromotionPhase::Failed,
        StepStatus::Aborted => PromotionPhase::Aborted,
        _ => PromotionPhase::Errored,
    };
    let verb = match phase {
        PromotionPhase::Failed => "failed",
        PromotionPhase::Aborted => "was aborted",
        _ => "errored",
    };
    StepOutcome::Halt(phase, format!("step {:?} {verb}: {message}", step.alias))
}

/// Only literal guards are understood: empty or `true` runs the step,
/// `false` skips it.
fn evaluate_guard(guard: Option<&str>) -> std::result::Result<bool, String> {
    match guard.map(str::trim) {
        None | Some("") | Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(format!("unsupported guard expression {other:?}")),
    }
}
