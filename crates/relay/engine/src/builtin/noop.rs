use async_trait::async_trait;

use crate::error::StepError;
use crate::runner::{StepContext, StepResult, StepRunner};

/// Does nothing and succeeds immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunner;

#[async_trait]
impl StepRunner for NoopRunner {
    fn name(&self) -> &str {
        "noop"
    }

    async fn run(&self, _ctx: &StepContext) -> Result<StepResult, StepError> {
        Ok(StepResult::succeeded())
    }
}
