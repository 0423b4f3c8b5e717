// Trigger events and the entry gate deciding whether a contact may start a
// workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use cadence_shared::{ContactSnapshot, SubscriptionStatus};

use crate::error::StoreResult;
use crate::store::ExecutionStore;
use crate::workflows::definition::{WorkflowDefinition, WorkflowStatus};
use crate::workflows::execution::ExecutionStatus;

/// Upstream events that can start workflows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ContactSignedUp,
    PurchaseCompleted,
    TagAdded,
    FormSubmitted,
    Manual,
    ApiCall,
}

/// Source of a trigger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventSource {
    System,
    User(Uuid),
    Api,
    Integration(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub kind: TriggerKind,
    pub contact_id: Uuid,
    pub payload: JsonValue,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(kind: TriggerKind, contact_id: Uuid, payload: JsonValue, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            contact_id,
            payload,
            source,
            timestamp: Utc::now(),
        }
    }

    pub fn contact_signed_up(contact_id: Uuid, email: &str, signup_source: &str) -> Self {
        Self::new(
            TriggerKind::ContactSignedUp,
            contact_id,
            serde_json::json!({
                "email": email,
                "signup_source": signup_source,
            }),
            EventSource::System,
        )
    }

    pub fn purchase_completed(contact_id: Uuid, order_id: Uuid, plan: &str, amount_cents: i64) -> Self {
        Self::new(
            TriggerKind::PurchaseCompleted,
            contact_id,
            serde_json::json!({
                "order_id": order_id,
                "plan": plan,
                "amount_cents": amount_cents,
            }),
            EventSource::System,
        )
    }

    pub fn tag_added(contact_id: Uuid, tag: &str, added_by: Uuid) -> Self {
        Self::new(
            TriggerKind::TagAdded,
            contact_id,
            serde_json::json!({ "tag": tag, "added_by": added_by }),
            EventSource::User(added_by),
        )
    }

    pub fn form_submitted(contact_id: Uuid, form_id: Uuid, fields: JsonValue) -> Self {
        Self::new(
            TriggerKind::FormSubmitted,
            contact_id,
            serde_json::json!({ "form_id": form_id, "fields": fields }),
            EventSource::System,
        )
    }

    pub fn manual(contact_id: Uuid, requested_by: Uuid) -> Self {
        Self::new(
            TriggerKind::Manual,
            contact_id,
            serde_json::json!({ "requested_by": requested_by }),
            EventSource::User(requested_by),
        )
    }
}

/// Why a contact was refused entry. Not an error: refusals are expected and
/// merely logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    WorkflowNotActive,
    ExecutionLimitReached,
    AlreadyRunning,
    NotSubscribed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject(RejectReason),
}

/// Entry gate. Checks run in a fixed order: workflow status, per-contact
/// execution limits, then subscription state.
pub struct TriggerGate {
    store: Arc<dyn ExecutionStore>,
}

impl TriggerGate {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    pub async fn admit(
        &self,
        workflow: &WorkflowDefinition,
        contact: &ContactSnapshot,
    ) -> StoreResult<Decision> {
        if workflow.status != WorkflowStatus::Active {
            return Ok(Decision::Reject(RejectReason::WorkflowNotActive));
        }

        let settings = &workflow.settings;
        if settings.max_executions_per_contact > 0 {
            let used = self
                .store
                .count_for_contact(
                    workflow.id,
                    contact.id,
                    &[ExecutionStatus::Running, ExecutionStatus::Completed],
                )
                .await?;
            if used >= settings.max_executions_per_contact as u64 {
                return Ok(Decision::Reject(RejectReason::ExecutionLimitReached));
            }
        }

        if !settings.allow_concurrent_runs {
            let running = self
                .store
                .count_for_contact(workflow.id, contact.id, &[ExecutionStatus::Running])
                .await?;
            if running > 0 {
                return Ok(Decision::Reject(RejectReason::AlreadyRunning));
            }
        }

        if settings.respect_unsubscribes
            && contact.subscription_status != SubscriptionStatus::Subscribed
        {
            return Ok(Decision::Reject(RejectReason::NotSubscribed));
        }

        Ok(Decision::Admit)
    }
}
