// Common test utilities: fake collaborators and an engine harness wired to
// the in-memory stores.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use cadence_shared::{ContactSnapshot, ContactMutation, DeliveryReceipt, MessageContent};

use crate::collaborators::{
    ContactError, ContactStore, DeliveryError, DeliveryProvider, MutationOutcome, RenderError,
    TemplateRenderer, WebhookCaller, WebhookError,
};
use crate::config::EngineConfig;
use crate::store::{MemoryExecutionStore, MemoryFrequencyCapStore};
use crate::workflows::engine::WorkflowEngine;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Renders `subject {template_id}` / body from the context; can simulate
/// missing templates and transient outages.
#[derive(Default)]
pub struct FakeRenderer {
    missing: Mutex<HashSet<Uuid>>,
    unavailable_times: AtomicU32,
    renders: AtomicU32,
}

impl FakeRenderer {
    pub async fn mark_missing(&self, template_id: Uuid) {
        self.missing.lock().await.insert(template_id);
    }

    pub fn fail_next(&self, times: u32) {
        self.unavailable_times.store(times, Ordering::SeqCst);
    }

    pub fn renders(&self) -> u32 {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateRenderer for FakeRenderer {
    async fn render(
        &self,
        template_id: Uuid,
        _context: &JsonValue,
    ) -> Result<MessageContent, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.missing.lock().await.contains(&template_id) {
            return Err(RenderError::TemplateNotFound(template_id));
        }
        if self
            .unavailable_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RenderError::Unavailable("renderer offline".to_string()));
        }
        Ok(MessageContent {
            subject: format!("subject {template_id}"),
            body: format!("body {template_id}"),
        })
    }
}

/// Honors idempotency keys: a repeated key returns the original receipt and
/// does not count as a new delivery.
#[derive(Default)]
pub struct FakeDelivery {
    sends: Mutex<HashMap<String, DeliveryReceipt>>,
    attempts: AtomicU32,
    unavailable_times: AtomicU32,
    refuse: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl FakeDelivery {
    pub fn fail_next(&self, times: u32) {
        self.unavailable_times.store(times, Ordering::SeqCst);
    }

    pub fn refuse_next(&self, times: u32) {
        self.refuse.store(times, Ordering::SeqCst);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }

    /// Total calls, including failed and deduplicated attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Distinct messages actually delivered.
    pub async fn unique_sends(&self) -> usize {
        self.sends.lock().await.len()
    }
}

#[async_trait]
impl DeliveryProvider for FakeDelivery {
    async fn send(
        &self,
        idempotency_key: &str,
        _recipient: &str,
        _content: &MessageContent,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = *self.delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        if self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeliveryError::Refused("recipient blocked".to_string()));
        }
        if self
            .unavailable_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeliveryError::Unavailable("provider down".to_string()));
        }

        let mut sends = self.sends.lock().await;
        if let Some(receipt) = sends.get(idempotency_key) {
            return Ok(receipt.clone());
        }
        let receipt = DeliveryReceipt {
            delivery_id: format!("dlv-{}", Uuid::new_v4()),
            accepted_at: Utc::now(),
        };
        sends.insert(idempotency_key.to_string(), receipt.clone());
        Ok(receipt)
    }
}

/// Contact system of record backed by a map; can simulate stale-snapshot
/// conflicts.
#[derive(Default)]
pub struct FakeContactStore {
    contacts: Mutex<HashMap<Uuid, ContactSnapshot>>,
    conflict_times: AtomicU32,
    mutations: AtomicU32,
}

impl FakeContactStore {
    pub async fn insert(&self, contact: ContactSnapshot) {
        self.contacts.lock().await.insert(contact.id, contact);
    }

    pub fn conflict_next(&self, times: u32) {
        self.conflict_times.store(times, Ordering::SeqCst);
    }

    pub fn mutations(&self) -> u32 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self, contact_id: Uuid) -> Option<ContactSnapshot> {
        self.contacts.lock().await.get(&contact_id).cloned()
    }
}

#[async_trait]
impl ContactStore for FakeContactStore {
    async fn get(&self, contact_id: Uuid) -> Result<ContactSnapshot, ContactError> {
        self.contacts
            .lock()
            .await
            .get(&contact_id)
            .cloned()
            .ok_or(ContactError::NotFound(contact_id))
    }

    async fn apply_mutation(
        &self,
        contact_id: Uuid,
        mutation: &ContactMutation,
    ) -> Result<MutationOutcome, ContactError> {
        if self
            .conflict_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(MutationOutcome::Conflict);
        }

        let mut contacts = self.contacts.lock().await;
        let contact = contacts
            .get_mut(&contact_id)
            .ok_or(ContactError::NotFound(contact_id))?;
        contact.apply(mutation);
        contact.updated_at = Utc::now();
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(MutationOutcome::Applied(contact.clone()))
    }
}

#[derive(Default)]
pub struct FakeWebhookCaller {
    posts: Mutex<Vec<(String, JsonValue)>>,
    fail_times: AtomicU32,
}

impl FakeWebhookCaller {
    pub fn fail_next(&self, times: u32) {
        self.fail_times.store(times, Ordering::SeqCst);
    }

    pub async fn posts(&self) -> Vec<(String, JsonValue)> {
        self.posts.lock().await.clone()
    }
}

#[async_trait]
impl WebhookCaller for FakeWebhookCaller {
    async fn post(&self, url: &str, payload: &JsonValue) -> Result<(), WebhookError> {
        if self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(WebhookError::Status(502));
        }
        self.posts
            .lock()
            .await
            .push((url.to_string(), payload.clone()));
        Ok(())
    }
}

/// Fully wired engine over the in-memory stores and fakes.
pub struct TestHarness {
    pub engine: Arc<WorkflowEngine>,
    pub store: Arc<MemoryExecutionStore>,
    pub caps: Arc<MemoryFrequencyCapStore>,
    pub renderer: Arc<FakeRenderer>,
    pub delivery: Arc<FakeDelivery>,
    pub contacts: Arc<FakeContactStore>,
    pub webhooks: Arc<FakeWebhookCaller>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();

        let store = Arc::new(MemoryExecutionStore::new());
        let caps = Arc::new(MemoryFrequencyCapStore::new());
        let renderer = Arc::new(FakeRenderer::default());
        let delivery = Arc::new(FakeDelivery::default());
        let contacts = Arc::new(FakeContactStore::default());
        let webhooks = Arc::new(FakeWebhookCaller::default());

        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            caps.clone(),
            renderer.clone(),
            delivery.clone(),
            contacts.clone(),
            webhooks.clone(),
            config,
        ));

        Self {
            engine,
            store,
            caps,
            renderer,
            delivery,
            contacts,
            webhooks,
        }
    }

    pub async fn add_contact(&self, email: &str) -> ContactSnapshot {
        let contact = ContactSnapshot::new(Uuid::new_v4(), email);
        self.contacts.insert(contact.clone()).await;
        contact
    }
}
