// Message step - render a template and hand it to the delivery provider.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use cadence_shared::SubscriptionStatus;

use crate::collaborators::{DeliveryError, RenderError};
use crate::error::{StepError, StepResult};
use crate::workflows::definition::{Guard, MessageConfig, RetryPolicy, Step, WorkflowDefinition};
use crate::workflows::execution::{Execution, ExecutionLogEntry, LogOutcome};
use crate::workflows::processors::{outgoing, ProcessOutcome, ProcessorContext};

/// Result of the eligibility-checked send path, shared with split tests.
pub(super) enum SendResult {
    /// Business-rule skip; the workflow continues on the default edge.
    Skipped(&'static str),
    Sent { delivery_id: String },
}

pub async fn process(
    workflow: &WorkflowDefinition,
    execution: &Execution,
    step: &Step,
    config: &MessageConfig,
    now: DateTime<Utc>,
    deps: &ProcessorContext<'_>,
) -> StepResult<ProcessOutcome> {
    let result = send_message(workflow, execution, step.id, config.template_id, &config.retry, now, deps).await?;

    Ok(match result {
        SendResult::Skipped(reason) => ProcessOutcome::Advance {
            next_step_id: outgoing(step, None),
            entry: ExecutionLogEntry::new(step.id, "message", LogOutcome::Skipped, reason)
                .with_data(json!({ "template_id": config.template_id })),
            context: None,
            sent_delivery_id: None,
        },
        SendResult::Sent { delivery_id } => ProcessOutcome::Advance {
            next_step_id: outgoing(step, Some(&Guard::Success)),
            entry: ExecutionLogEntry::new(step.id, "message", LogOutcome::Success, "message sent")
                .with_data(json!({
                    "template_id": config.template_id,
                    "delivery_id": delivery_id.clone(),
                })),
            context: None,
            sent_delivery_id: Some(delivery_id),
        },
    })
}

/// Check eligibility, reserve a frequency-cap slot, render, and send exactly
/// once per (execution, step). Transient renderer/provider failures retry
/// with exponential backoff up to the step's policy before escalating.
pub(super) async fn send_message(
    workflow: &WorkflowDefinition,
    execution: &Execution,
    step_id: Uuid,
    template_id: Uuid,
    retry: &RetryPolicy,
    now: DateTime<Utc>,
    deps: &ProcessorContext<'_>,
) -> StepResult<SendResult> {
    let contact = execution.contact()?;
    let settings = &workflow.settings;

    if settings.respect_unsubscribes
        && contact.subscription_status != SubscriptionStatus::Subscribed
    {
        info!(
            execution_id = %execution.id,
            contact_id = %contact.id,
            "skipping message for non-subscribed contact"
        );
        return Ok(SendResult::Skipped("contact is not subscribed"));
    }

    if let Some(cap) = &settings.frequency_cap {
        let reserved = deps
            .caps
            .try_reserve(contact.id, now.date_naive(), cap.max_per_day)
            .await
            .map_err(|e| StepError::Delivery(e.to_string()))?;
        if !reserved {
            info!(
                execution_id = %execution.id,
                contact_id = %contact.id,
                "skipping message, frequency cap reached"
            );
            return Ok(SendResult::Skipped("frequency cap reached"));
        }
    }

    let content = render_with_retry(template_id, execution, retry, deps).await?;

    let key = execution.delivery_key(step_id);
    let receipt = send_with_retry(&key, &contact.email, &content, retry, deps).await?;

    Ok(SendResult::Sent {
        delivery_id: receipt.delivery_id,
    })
}

async fn render_with_retry(
    template_id: Uuid,
    execution: &Execution,
    retry: &RetryPolicy,
    deps: &ProcessorContext<'_>,
) -> StepResult<cadence_shared::MessageContent> {
    let attempts = retry.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match deps.renderer.render(template_id, &execution.context).await {
            Ok(content) => return Ok(content),
            Err(RenderError::TemplateNotFound(id)) => return Err(StepError::TemplateNotFound(id)),
            Err(RenderError::Unavailable(msg)) => {
                warn!(%template_id, attempt, "template renderer unavailable: {msg}");
                last_error = msg;
                if attempt < attempts {
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                }
            }
        }
    }
    Err(StepError::Render(last_error))
}

async fn send_with_retry(
    idempotency_key: &str,
    recipient: &str,
    content: &cadence_shared::MessageContent,
    retry: &RetryPolicy,
    deps: &ProcessorContext<'_>,
) -> StepResult<cadence_shared::DeliveryReceipt> {
    let attempts = retry.max_attempts.max(1);
    let timeout = deps.config.delivery_timeout;
    let mut last_error = StepError::Delivery("no attempt made".to_string());

    for attempt in 1..=attempts {
        match tokio::time::timeout(timeout, deps.delivery.send(idempotency_key, recipient, content))
            .await
        {
            Ok(Ok(receipt)) => return Ok(receipt),
            Ok(Err(DeliveryError::Refused(msg))) => return Err(StepError::Delivery(msg)),
            Ok(Err(DeliveryError::Unavailable(msg))) => {
                warn!(idempotency_key, attempt, "delivery provider unavailable: {msg}");
                last_error = StepError::Delivery(msg);
            }
            Err(_) => {
                warn!(idempotency_key, attempt, "delivery attempt timed out");
                last_error = StepError::DeliveryTimeout(timeout.as_secs());
            }
        }
        if attempt < attempts {
            tokio::time::sleep(retry.delay_for(attempt)).await;
        }
    }
    Err(last_error)
}
