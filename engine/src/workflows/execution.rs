// Executions - one contact's live run through a workflow version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use cadence_shared::ContactSnapshot;

use crate::error::{StepError, StepResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Paused,
    Exited,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Exited => "exited",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "paused" => Some(Self::Paused),
            "exited" => Some(Self::Exited),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exited)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Success,
    Failure,
    Skipped,
}

impl LogOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// One line of the append-only audit trail. Entries are never mutated after
/// append; they are the replay source for debugging a contact's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub step_id: Uuid,
    pub action: String,
    pub outcome: LogOutcome,
    pub detail: String,
    pub data: Option<JsonValue>,
}

impl ExecutionLogEntry {
    pub fn new(step_id: Uuid, action: &str, outcome: LogOutcome, detail: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            step_id,
            action: action.to_string(),
            outcome,
            detail: detail.to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_version: i32,
    pub contact_id: Uuid,
    pub status: ExecutionStatus,
    pub current_step_id: Option<Uuid>,
    /// Set while parked on a Wait step; the execution is not due before this.
    pub wake_at: Option<DateTime<Utc>>,
    /// Number of advances applied so far; feeds advance idempotency keys so a
    /// crash-retry of the same visit is a no-op while a later legitimate
    /// revisit of the same step (in a cycle) is not.
    pub steps_taken: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque context object: trigger payload under "trigger", the mutable
    /// contact snapshot under "contact".
    pub context: JsonValue,
}

impl Execution {
    pub fn start(
        workflow_id: Uuid,
        workflow_version: i32,
        contact: &ContactSnapshot,
        trigger_payload: JsonValue,
        entry_step_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            workflow_version,
            contact_id: contact.id,
            status: ExecutionStatus::Running,
            current_step_id: Some(entry_step_id),
            wake_at: None,
            steps_taken: 0,
            started_at: Utc::now(),
            completed_at: None,
            context: serde_json::json!({
                "trigger": trigger_payload,
                "contact": contact,
            }),
        }
    }

    /// The contact snapshot as this execution currently sees it.
    pub fn contact(&self) -> StepResult<ContactSnapshot> {
        let value = self
            .context
            .get("contact")
            .ok_or_else(|| StepError::Context("missing contact snapshot".to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| StepError::Context(format!("contact snapshot: {e}")))
    }

    /// Replace the contact snapshot in the context, returning the updated
    /// context value for persistence.
    pub fn context_with_contact(&self, contact: &ContactSnapshot) -> StepResult<JsonValue> {
        let mut context = self.context.clone();
        let object = context
            .as_object_mut()
            .ok_or_else(|| StepError::Context("context is not an object".to_string()))?;
        object.insert(
            "contact".to_string(),
            serde_json::to_value(contact)
                .map_err(|e| StepError::Context(format!("contact snapshot: {e}")))?,
        );
        Ok(context)
    }

    /// Idempotency key for the advance out of the current step visit.
    pub fn advance_key(&self, step_id: Uuid) -> String {
        format!("{}:{}", step_id, self.steps_taken)
    }

    /// Idempotency key handed to the delivery provider for a message step.
    pub fn delivery_key(&self, step_id: Uuid) -> String {
        format!("{}:{}", self.id, step_id)
    }
}
