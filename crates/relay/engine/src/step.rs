//! Engine-side view of Promotion steps

use relay_types::{ExpressionVariable, PromotionStep, RetryPolicy};
use std::time::Duration;

use crate::runner::StepRunner;

/// A step as handed to an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Runner kind
    pub kind: String,
    /// Unique name within the Promotion; keys the step's output in shared state
    pub alias: String,
    pub guard: Option<String>,
    pub continue_on_error: bool,
    pub retry: Option<RetryPolicy>,
    pub vars: Vec<ExpressionVariable>,
    pub config: Option<serde_json::Value>,
}

impl Step {
    /// Build the engine step for the `index`-th declared step. Steps
    /// without an explicit alias are named `step-<index>`.
    pub fn from_promotion_step(index: usize, step: &PromotionStep) -> Self {
        let alias = step
            .alias
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("step-{index}"));
        Self {
            kind: step.uses.clone(),
            alias,
            guard: step.guard.clone(),
            continue_on_error: step.continue_on_error,
            retry: step.retry.clone(),
            vars: step.vars.clone(),
            config: step.config.clone(),
        }
    }

    /// Translate declared steps, keeping their order.
    pub fn from_promotion_steps(steps: &[PromotionStep]) -> Vec<Self> {
        steps
            .iter()
            .enumerate()
            .map(|(i, s)| Self::from_promotion_step(i, s))
            .collect()
    }

    /// Effective timeout: the step's own retry timeout, else the runner's
    /// default. Zero means no timeout.
    pub fn timeout(&self, runner: Option<&dyn StepRunner>) -> Option<Duration> {
        self.retry
            .as_ref()
            .and_then(RetryPolicy::timeout)
            .or_else(|| runner.and_then(|r| r.default_timeout()))
            .filter(|t| !t.is_zero())
    }

    pub fn error_threshold(&self) -> u32 {
        self.retry
            .as_ref()
            .map(RetryPolicy::error_threshold)
            .unwrap_or(RetryPolicy::DEFAULT_ERROR_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{NoopRunner, WaitRunner};

    #[test]
    fn test_alias_defaults_to_index() {
        let mut named = PromotionStep::uses("noop");
        named.alias = Some("clone".into());
        let steps = Step::from_promotion_steps(&[PromotionStep::uses("noop"), named]);
        assert_eq!(steps[0].alias, "step-0");
        assert_eq!(steps[1].alias, "clone");
    }

    #[test]
    fn test_timeout_resolution() {
        let mut declared = PromotionStep::uses("wait");
        let step = Step::from_promotion_step(0, &declared);
        assert_eq!(step.timeout(Some(&NoopRunner)), None);
        assert_eq!(step.timeout(Some(&WaitRunner)), WaitRunner::DEFAULT_TIMEOUT);

        declared.retry = Some(RetryPolicy {
            timeout_seconds: Some(120),
            error_threshold: None,
        });
        let step = Step::from_promotion_step(0, &declared);
        assert_eq!(step.timeout(Some(&WaitRunner)), Some(Duration::from_secs(120)));

        declared.retry = Some(RetryPolicy {
            timeout_seconds: Some(0),
            error_threshold: None,
        });
        let step = Step::from_promotion_step(0, &declared);
        assert_eq!(step.timeout(None), None);
    }

    #[test]
    fn test_error_threshold_default() {
        let step = Step::from_promotion_step(0, &PromotionStep::uses("noop"));
        assert_eq!(step.error_threshold(), 1);
    }
}
