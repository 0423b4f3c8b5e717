// Step processors - one transition function per step kind.
//
// The engine only sees the uniform ProcessOutcome; everything kind-specific
// stays behind the pattern match in `process`.

pub mod action;
pub mod condition;
pub mod message;
pub mod split;
pub mod wait;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::collaborators::{ContactStore, DeliveryProvider, TemplateRenderer, WebhookCaller};
use crate::config::EngineConfig;
use crate::error::{StepError, StepResult};
use crate::store::FrequencyCapStore;
use crate::workflows::definition::{Guard, Step, StepKind, WorkflowDefinition};
use crate::workflows::execution::{Execution, ExecutionLogEntry};

/// Collaborators and tuning a processor may use. Injected by the engine;
/// processors hold no state of their own.
pub struct ProcessorContext<'a> {
    pub renderer: &'a dyn TemplateRenderer,
    pub delivery: &'a dyn DeliveryProvider,
    pub contacts: &'a dyn ContactStore,
    pub webhooks: &'a dyn WebhookCaller,
    pub caps: &'a dyn FrequencyCapStore,
    pub config: &'a EngineConfig,
}

/// What the engine should do with the execution after a step ran.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Record the log entry and move on. `next_step_id: None` means the step
    /// had no applicable outgoing edge: the execution is complete.
    Advance {
        next_step_id: Option<Uuid>,
        entry: ExecutionLogEntry,
        /// Updated execution context, when the step changed it.
        context: Option<JsonValue>,
        /// Delivery id when this step handed a message to the provider.
        sent_delivery_id: Option<String>,
    },
    /// Park until `wake_at`; position unchanged, no log entry.
    Park { wake_at: DateTime<Utc> },
}

/// Run the processor for the execution's current step.
pub async fn process(
    workflow: &WorkflowDefinition,
    execution: &Execution,
    step: &Step,
    now: DateTime<Utc>,
    deps: &ProcessorContext<'_>,
) -> StepResult<ProcessOutcome> {
    match &step.kind {
        StepKind::Message(config) => message::process(workflow, execution, step, config, now, deps).await,
        StepKind::Wait(config) => wait::process(execution, step, config, now),
        StepKind::Condition(config) => condition::process(execution, step, config),
        StepKind::Action(kind) => action::process(workflow, execution, step, kind, deps).await,
        StepKind::SplitTest(config) => {
            split::process(workflow, execution, step, config, now, deps).await
        }
    }
}

/// Resolve the outgoing edge for a guard, falling back to the unguarded
/// default connection.
pub fn outgoing(step: &Step, guard: Option<&Guard>) -> Option<Uuid> {
    if let Some(guard) = guard {
        if let Some(conn) = step
            .connections
            .iter()
            .find(|c| c.guard.as_ref() == Some(guard))
        {
            return Some(conn.target_step_id);
        }
    }
    step.connections
        .iter()
        .find(|c| c.guard.is_none())
        .map(|c| c.target_step_id)
}

/// Resolve an edge that must exist with this exact guard; a branch result
/// with nowhere to go is a definition-level hole and fails the execution.
pub fn require_branch(step: &Step, guard: &Guard, label: &str) -> StepResult<Uuid> {
    step.connections
        .iter()
        .find(|c| c.guard.as_ref() == Some(guard))
        .map(|c| c.target_step_id)
        .ok_or_else(|| StepError::MissingBranch {
            step_id: step.id,
            label: label.to_string(),
        })
}
