// Split-test step - deterministic variant assignment, then the message send
// path with the chosen variant's template.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::StepResult;
use crate::workflows::definition::{Guard, SplitTestConfig, SplitVariant, Step, WorkflowDefinition};
use crate::workflows::execution::{Execution, ExecutionLogEntry, LogOutcome};
use crate::workflows::processors::message::{send_message, SendResult};
use crate::workflows::processors::{outgoing, ProcessOutcome, ProcessorContext};

/// Stable bucket in 0..100 for a contact. Derived from the contact id alone,
/// so re-evaluation always lands in the same bucket, across processes and
/// restarts.
pub fn bucket_for(contact_id: Uuid) -> u8 {
    (contact_id.as_u128() % 100) as u8
}

/// Pick the variant whose cumulative percentage range contains the contact's
/// bucket. Assumes percentages sum to 100 (validated at publish).
pub fn assign_variant(contact_id: Uuid, variants: &[SplitVariant]) -> &SplitVariant {
    let bucket = bucket_for(contact_id) as u32;
    let mut cumulative = 0u32;
    for variant in variants {
        cumulative += variant.percent as u32;
        if bucket < cumulative {
            return variant;
        }
    }
    variants.last().expect("split test has at least one variant")
}

pub async fn process(
    workflow: &WorkflowDefinition,
    execution: &Execution,
    step: &Step,
    config: &SplitTestConfig,
    now: DateTime<Utc>,
    deps: &ProcessorContext<'_>,
) -> StepResult<ProcessOutcome> {
    let variant = assign_variant(execution.contact_id, &config.variants);
    let guard = Guard::Variant(variant.name.clone());

    let result = send_message(
        workflow,
        execution,
        step.id,
        variant.template_id,
        &config.retry,
        now,
        deps,
    )
    .await?;

    Ok(match result {
        SendResult::Skipped(reason) => ProcessOutcome::Advance {
            next_step_id: outgoing(step, Some(&guard)),
            entry: ExecutionLogEntry::new(step.id, "split_test", LogOutcome::Skipped, reason)
                .with_data(json!({
                    "variant": variant.name,
                    "template_id": variant.template_id,
                })),
            context: None,
            sent_delivery_id: None,
        },
        SendResult::Sent { delivery_id } => ProcessOutcome::Advance {
            next_step_id: outgoing(step, Some(&guard)),
            entry: ExecutionLogEntry::new(
                step.id,
                "split_test",
                LogOutcome::Success,
                &format!("sent variant '{}'", variant.name),
            )
            .with_data(json!({
                "variant": variant.name,
                "template_id": variant.template_id,
                "delivery_id": delivery_id.clone(),
            })),
            context: None,
            sent_delivery_id: Some(delivery_id),
        },
    })
}
