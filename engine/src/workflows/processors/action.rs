// Action step - mutate the contact through the capability interface, or call
// an outbound webhook.

use serde_json::json;
use tracing::warn;

use cadence_shared::ContactMutation;

use crate::collaborators::MutationOutcome;
use crate::error::{StepError, StepResult};
use crate::workflows::definition::{ActionKind, Guard, RetryPolicy, Step, WorkflowDefinition};
use crate::workflows::execution::{Execution, ExecutionLogEntry, LogOutcome};
use crate::workflows::processors::{outgoing, ProcessOutcome, ProcessorContext};

pub async fn process(
    workflow: &WorkflowDefinition,
    execution: &Execution,
    step: &Step,
    kind: &ActionKind,
    deps: &ProcessorContext<'_>,
) -> StepResult<ProcessOutcome> {
    match kind {
        ActionKind::AddTag { tag } => {
            let mutation = ContactMutation::AddTag { tag: tag.clone() };
            apply_mutation(execution, step, &mutation, &format!("added tag '{tag}'"), deps).await
        }
        ActionKind::RemoveTag { tag } => {
            let mutation = ContactMutation::RemoveTag { tag: tag.clone() };
            apply_mutation(execution, step, &mutation, &format!("removed tag '{tag}'"), deps).await
        }
        ActionKind::UpdateField { field, value } => {
            let mutation = ContactMutation::SetAttribute {
                field: field.clone(),
                value: value.clone(),
            };
            apply_mutation(
                execution,
                step,
                &mutation,
                &format!("updated field '{field}'"),
                deps,
            )
            .await
        }
        ActionKind::Webhook { url, retry } => {
            call_webhook(workflow, execution, step, url, retry, deps).await
        }
    }
}

/// Apply a mutation to the system of record and reconcile the execution's
/// snapshot before advancing, so downstream steps never read stale data.
/// A Conflict means our snapshot was stale: re-fetch and retry, bounded.
async fn apply_mutation(
    execution: &Execution,
    step: &Step,
    mutation: &ContactMutation,
    detail: &str,
    deps: &ProcessorContext<'_>,
) -> StepResult<ProcessOutcome> {
    let contact_id = execution
        .contact()
        .map(|c| c.id)
        .unwrap_or(execution.contact_id);
    let attempts = deps.config.mutation_retries.max(1);

    let mut reconciled = None;
    for attempt in 1..=attempts {
        match deps
            .contacts
            .apply_mutation(contact_id, mutation)
            .await
            .map_err(|e| StepError::Contact(e.to_string()))?
        {
            MutationOutcome::Applied(snapshot) => {
                reconciled = Some(snapshot);
                break;
            }
            MutationOutcome::Conflict => {
                warn!(
                    execution_id = %execution.id,
                    %contact_id,
                    attempt,
                    "contact mutation conflicted, refreshing snapshot"
                );
                // Refresh so the next attempt starts from the current truth.
                deps.contacts
                    .get(contact_id)
                    .await
                    .map_err(|e| StepError::Contact(e.to_string()))?;
            }
        }
    }

    let Some(snapshot) = reconciled else {
        return Err(StepError::MutationConflict(attempts));
    };

    let context = execution.context_with_contact(&snapshot)?;

    Ok(ProcessOutcome::Advance {
        next_step_id: outgoing(step, Some(&Guard::Success)),
        entry: ExecutionLogEntry::new(step.id, "action", LogOutcome::Success, detail)
            .with_data(serde_json::to_value(mutation).ok().unwrap_or(json!(null))),
        context: Some(context),
        sent_delivery_id: None,
    })
}

async fn call_webhook(
    workflow: &WorkflowDefinition,
    execution: &Execution,
    step: &Step,
    url: &str,
    retry: &RetryPolicy,
    deps: &ProcessorContext<'_>,
) -> StepResult<ProcessOutcome> {
    let payload = json!({
        "execution_id": execution.id,
        "workflow_id": workflow.id,
        "contact": execution.context.get("contact"),
        "trigger": execution.context.get("trigger"),
    });

    let attempts = retry.max_attempts.max(1);
    let mut last_error = String::new();
    let mut delivered = false;

    for attempt in 1..=attempts {
        match deps.webhooks.post(url, &payload).await {
            Ok(()) => {
                delivered = true;
                break;
            }
            Err(e) => {
                warn!(url, attempt, "webhook call failed: {e}");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                }
            }
        }
    }

    if !delivered {
        return Err(StepError::Webhook(last_error));
    }

    Ok(ProcessOutcome::Advance {
        next_step_id: outgoing(step, Some(&Guard::Success)),
        entry: ExecutionLogEntry::new(step.id, "action", LogOutcome::Success, "webhook delivered")
            .with_data(json!({ "url": url })),
        context: None,
        sent_delivery_id: None,
    })
}
