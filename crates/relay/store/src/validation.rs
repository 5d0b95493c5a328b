//! Schema validation for Promotion status writes

use relay_types::{PromotionSpec, PromotionStatus};

/// Longest status message the store accepts, in bytes
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Check a status write against the Promotion it belongs to.
///
/// Returns a human-readable reason when the status is not acceptable.
pub fn validate_promotion_status(
    spec: &PromotionSpec,
    status: &PromotionStatus,
) -> Result<(), String> {
    let steps = spec.steps.len();

    if status.current_step > steps {
        return Err(format!(
            "currentStep {} exceeds the {} declared steps",
            status.current_step, steps
        ));
    }

    if status.step_execution_metadata.len() > steps {
        return Err(format!(
            "stepExecutionMetadata has {} entries for {} declared steps",
            status.step_execution_metadata.len(),
            steps
        ));
    }

    if let Some(message) = &status.message {
        if message.len() > MAX_MESSAGE_LENGTH {
            return Err(format!(
                "message is {} bytes, limit is {}",
                message.len(),
                MAX_MESSAGE_LENGTH
            ));
        }
    }

    Ok(())
}
