// External collaborator contracts consumed by the engine.
//
// Template rendering, message delivery, and the contact system of record live
// outside this crate; the engine only ever talks to them through these traits.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use cadence_shared::{ContactMutation, ContactSnapshot, DeliveryReceipt, MessageContent};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template {0} not found")]
    TemplateNotFound(Uuid),
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The provider rejected the message outright; retrying cannot help.
    #[error("delivery refused: {0}")]
    Refused(String),
    /// The provider could not be reached or returned a retryable error.
    #[error("delivery provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ContactError {
    #[error("contact {0} not found")]
    NotFound(Uuid),
    #[error("contact store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Request(String),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Renders a message template against an execution context.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        template_id: Uuid,
        context: &JsonValue,
    ) -> Result<MessageContent, RenderError>;
}

/// Hands rendered content to the outbound channel (email, SMS, push).
///
/// Implementations must honor the idempotency key: a repeated `send` with the
/// same key returns the original receipt instead of delivering twice.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send(
        &self,
        idempotency_key: &str,
        recipient: &str,
        content: &MessageContent,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Result of asking the contact store to apply a mutation.
#[derive(Debug, Clone)]
pub enum MutationOutcome {
    /// The mutation was applied; the returned snapshot is the reconciled view.
    Applied(ContactSnapshot),
    /// The snapshot the mutation was based on is stale; re-fetch and retry.
    Conflict,
}

/// The contact system of record. The engine reads snapshots and submits
/// mutations; it never touches contact storage directly.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn get(&self, contact_id: Uuid) -> Result<ContactSnapshot, ContactError>;

    async fn apply_mutation(
        &self,
        contact_id: Uuid,
        mutation: &ContactMutation,
    ) -> Result<MutationOutcome, ContactError>;
}

/// Outbound webhook calls issued by Action steps.
#[async_trait]
pub trait WebhookCaller: Send + Sync {
    async fn post(&self, url: &str, payload: &JsonValue) -> Result<(), WebhookError>;
}

/// Default webhook caller backed by reqwest.
pub struct HttpWebhookCaller {
    client: reqwest::Client,
}

impl HttpWebhookCaller {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWebhookCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookCaller for HttpWebhookCaller {
    async fn post(&self, url: &str, payload: &JsonValue) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status(status.as_u16()))
        }
    }
}
