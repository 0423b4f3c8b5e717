// Condition step - branch on the contact/context predicates.

use serde_json::json;

use crate::error::StepResult;
use crate::workflows::conditions::evaluate;
use crate::workflows::definition::{ConditionConfig, Guard, Step};
use crate::workflows::execution::{Execution, ExecutionLogEntry, LogOutcome};
use crate::workflows::processors::{require_branch, ProcessOutcome};

pub fn process(
    execution: &Execution,
    step: &Step,
    config: &ConditionConfig,
) -> StepResult<ProcessOutcome> {
    let contact = execution.contact()?;
    let result = evaluate(&config.predicates, &contact, &execution.context);

    let (guard, label) = if result {
        (Guard::True, "true")
    } else {
        (Guard::False, "false")
    };
    let next = require_branch(step, &guard, label)?;

    Ok(ProcessOutcome::Advance {
        next_step_id: Some(next),
        entry: ExecutionLogEntry::new(
            step.id,
            "condition",
            LogOutcome::Success,
            &format!("condition evaluated to {result}"),
        )
        .with_data(json!({ "result": result })),
        context: None,
        sent_delivery_id: None,
    })
}
