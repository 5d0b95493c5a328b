use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

use crate::error::StepError;
use crate::runner::{StepContext, StepResult, StepRunner};

#[derive(Debug, Deserialize)]
struct WaitConfig {
    /// Seconds
    duration: u64,
}

/// Reports Running until `duration` seconds have passed since the step was
/// first attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitRunner;

impl WaitRunner {
    pub const DEFAULT_TIMEOUT: Option<Duration> = Some(Duration::from_secs(3600));
}

#[async_trait]
impl StepRunner for WaitRunner {
    fn name(&self) -> &str {
        "wait"
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let raw = ctx
            .config
            .clone()
            .ok_or_else(|| StepError::InvalidConfig("wait requires a duration".into()))?;
        let config: WaitConfig =
            serde_json::from_value(raw).map_err(|e| StepError::InvalidConfig(e.to_string()))?;

        let elapsed = (Utc::now() - ctx.started_at).num_seconds().max(0) as u64;
        if elapsed >= config.duration {
            Ok(StepResult::succeeded())
        } else {
            Ok(StepResult::running(format!(
                "waiting {}s more",
                config.duration - elapsed
            )))
        }
    }

    fn default_timeout(&self) -> Option<Duration> {
        Self::DEFAULT_TIMEOUT
    }
}
