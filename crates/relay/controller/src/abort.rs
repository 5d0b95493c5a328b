//! Termination of Promotions on user request

use chrono::{DateTime, Utc};
use relay_types::annotations::controller_actor;
use relay_types::{AbortPromotionRequest, PromotionPhase, PromotionStatus, StepStatus};

/// Who the abort is attributed to: the requester when named, otherwise the
/// controller itself.
pub fn abort_actor(request: &AbortPromotionRequest, controller_name: &str) -> String {
    request
        .actor
        .as_deref()
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| controller_actor(controller_name))
}

/// Status of a Promotion after it has been terminated by `actor`.
///
/// If a step was in flight it is marked Aborted as well.
pub fn terminated_status(
    status: &PromotionStatus,
    actor: &str,
    now: DateTime<Utc>,
) -> PromotionStatus {
    let mut terminated = status.clone();

    let current = status.current_step;
    if status.phase == Some(PromotionPhase::Running)
        && terminated.step_execution_metadata.len() == current + 1
    {
        let step = &mut terminated.step_execution_metadata[current];
        if step.status == StepStatus::Running {
            step.status = StepStatus::Aborted;
            step.finished_at = Some(now);
        }
    }

    terminated.phase = Some(PromotionPhase::Aborted);
    terminated.message = Some(if actor.is_empty() {
        "Promotion terminated per user request".to_string()
    } else {
        format!("Promotion terminated by {actor}")
    });
    terminated.finished_at = Some(now);
    terminated
}
