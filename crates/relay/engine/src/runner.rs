//! Step runners and the registry that resolves step kinds to them

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_types::{ExpressionVariable, HealthCheckStep, State, StepStatus};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::builtin::{NoopRunner, WaitRunner};
use crate::credentials::{CredentialType, Credentials, CredentialsDatabase};
use crate::error::{EngineError, Result, StepError};

/// Everything a runner sees when executing one step
#[derive(Debug, Clone)]
pub struct StepContext {
    pub project: String,
    pub stage: String,
    pub promotion: String,
    pub workspace: PathBuf,
    pub alias: String,
    pub config: Option<Value>,
    /// Promotion-level variables followed by step-level ones
    pub vars: Vec<ExpressionVariable>,
    /// State shared by all steps of the Promotion
    pub shared_state: State,
    /// When the step was first attempted
    pub started_at: DateTime<Utc>,
    /// Errors recorded so far for this step
    pub attempt_errors: u32,
    /// Repository credentials, scoped to `project`
    pub credentials: Arc<dyn CredentialsDatabase>,
}

impl StepContext {
    /// Look up credentials for a repository in the Promotion's project.
    /// A backend failure is transient and counts against the error threshold.
    pub async fn credentials_for(
        &self,
        credential_type: CredentialType,
        repo_url: &str,
    ) -> std::result::Result<Option<Credentials>, StepError> {
        self.credentials
            .get(&self.project, credential_type, repo_url)
            .await
            .map_err(|e| StepError::Transient(e.to_string()))
    }
}

/// Outcome of a single runner invocation
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub status: StepStatus,
    /// Stored in shared state under the step alias
    pub output: Option<Value>,
    pub message: Option<String>,
    pub health_check: Option<HealthCheckStep>,
}

impl StepResult {
    pub fn succeeded() -> Self {
        Self {
            status: StepStatus::Succeeded,
            output: None,
            message: None,
            health_check: None,
        }
    }

    /// The step has not finished; it will be invoked again later.
    pub fn running(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Running,
            output: None,
            message: Some(message.into()),
            health_check: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            message: Some(message.into()),
            health_check: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckStep) -> Self {
        self.health_check = Some(health_check);
        self
    }
}

/// Executes one kind of step.
///
/// Runners must be idempotent: a step reported as Running is invoked again
/// on a later reconcile, possibly by a different process.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Step kind this runner handles, matched against `uses`
    fn name(&self) -> &str;

    async fn run(&self, ctx: &StepContext) -> std::result::Result<StepResult, StepError>;

    /// Timeout applied when the step declares none
    fn default_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Registry mapping step kinds to runners.
///
/// Constructed at startup and injected wherever steps are resolved. The set
/// of kinds is open: any runner may be registered under its own name.
#[derive(Default)]
pub struct StepRunnerRegistry {
    runners: DashMap<String, Arc<dyn StepRunner>>,
}

impl StepRunnerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the builtin runners
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for runner in [
            Arc::new(NoopRunner) as Arc<dyn StepRunner>,
            Arc::new(WaitRunner),
        ] {
            // Fresh registry, names are distinct.
            let _ = registry.register(runner);
        }
        registry
    }

    /// Register a runner under its own name.
    pub fn register(&self, runner: Arc<dyn StepRunner>) -> Result<()> {
        let name = runner.name().to_string();
        match self.runners.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                Err(EngineError::DuplicateRunner(e.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(runner);
                Ok(())
            }
        }
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn StepRunner>> {
        self.runners.get(kind).map(|r| Arc::clone(r.value()))
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.runners.iter().map(|r| r.key().clone()).collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for StepRunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunnerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
