// Wait step - park the execution durably, never a sleeping task.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::StepResult;
use crate::workflows::definition::{Step, WaitConfig};
use crate::workflows::execution::{Execution, ExecutionLogEntry, LogOutcome};
use crate::workflows::processors::{outgoing, ProcessOutcome};

pub fn process(
    execution: &Execution,
    step: &Step,
    config: &WaitConfig,
    now: DateTime<Utc>,
) -> StepResult<ProcessOutcome> {
    match execution.wake_at {
        // First visit: compute the wake time and park. The position does not
        // change, so no log entry is written yet.
        None => Ok(ProcessOutcome::Park {
            wake_at: now + config.duration(),
        }),
        // Due: resolve the outgoing edge and record the single wait entry.
        Some(wake_at) if now >= wake_at => Ok(ProcessOutcome::Advance {
            next_step_id: outgoing(step, None),
            entry: ExecutionLogEntry::new(
                step.id,
                "wait",
                LogOutcome::Success,
                &format!("waited {} {:?}", config.amount, config.unit),
            )
            .with_data(json!({ "woke_at": now, "scheduled_for": wake_at })),
            context: None,
            sent_delivery_id: None,
        }),
        // Claimed ahead of time (should not happen through the scheduler);
        // keep the original wake time.
        Some(wake_at) => Ok(ProcessOutcome::Park { wake_at }),
    }
}
