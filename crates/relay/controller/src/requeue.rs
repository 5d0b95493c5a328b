//! Re-poll interval for running Promotions

use chrono::{DateTime, Utc};
use relay_engine::{Step, StepRunnerRegistry};
use relay_types::Promotion;
use std::sync::Arc;
use std::time::Duration;

/// Computes when a running Promotion should next be reconciled.
///
/// Normally that is the default interval, but if the current step will hit
/// its timeout sooner the Promotion is checked at the deadline instead.
#[derive(Debug, Clone)]
pub struct RequeueScheduler {
    registry: Arc<StepRunnerRegistry>,
    default_interval: Duration,
}

impl RequeueScheduler {
    pub fn new(registry: Arc<StepRunnerRegistry>, default_interval: Duration) -> Self {
        Self {
            registry,
            default_interval,
        }
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    pub fn next_delay(&self, promotion: &Promotion, now: DateTime<Utc>) -> Duration {
        let index = promotion.status.current_step;
        let Some(declared) = promotion.spec.steps.get(index) else {
            return self.default_interval;
        };

        let step = Step::from_promotion_step(index, declared);
        let runner = self.registry.get(&step.kind);
        let Some(timeout) = step.timeout(runner.as_deref()) else {
            return self.default_interval;
        };

        let Some(started_at) = promotion
            .status
            .step_execution_metadata
            .get(index)
            .and_then(|m| m.started_at)
        else {
            return self.default_interval;
        };

        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return self.default_interval;
        };
        let deadline = started_at + timeout;
        let horizon = now + chrono::Duration::from_std(self.default_interval).unwrap_or_default();

        if deadline < horizon {
            (deadline - now).to_std().unwrap_or(Duration::ZERO)
        } else {
            self.default_interval
        }
    }
}
