// Analytics aggregator - a read-only consumer of engine transitions.
//
// Counters are advisory and never feed back into step processing. Delivery
// callbacks arrive out-of-band, possibly duplicated and out of order, keyed
// by delivery id.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use cadence_shared::DeliveryEvent;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct WorkflowStats {
    pub entered: u64,
    pub completed: u64,
    pub failed: u64,
    pub exited: u64,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StepStats {
    pub entered: u64,
    pub completed: u64,
    pub skipped: u64,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct MessageStats {
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub bounced: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    workflows: HashMap<Uuid, WorkflowStats>,
    steps: HashMap<(Uuid, Uuid), StepStats>,
    messages: HashMap<(Uuid, Uuid), MessageStats>,
    /// delivery_id -> (workflow, step), recorded at send time.
    deliveries: HashMap<String, (Uuid, Uuid)>,
    /// (delivery_id, event) pairs already applied; duplicates are dropped.
    seen_events: HashSet<(String, DeliveryEvent)>,
    /// Events that arrived before their send was recorded.
    pending_events: HashMap<String, Vec<DeliveryEvent>>,
}

#[derive(Default)]
pub struct AnalyticsAggregator {
    inner: RwLock<Counters>,
}

impl AnalyticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn workflow_entered(&self, workflow_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.workflows.entry(workflow_id).or_default().entered += 1;
    }

    pub async fn workflow_completed(&self, workflow_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.workflows.entry(workflow_id).or_default().completed += 1;
    }

    pub async fn workflow_failed(&self, workflow_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.workflows.entry(workflow_id).or_default().failed += 1;
    }

    pub async fn workflow_exited(&self, workflow_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.workflows.entry(workflow_id).or_default().exited += 1;
    }

    pub async fn step_entered(&self, workflow_id: Uuid, step_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.steps.entry((workflow_id, step_id)).or_default().entered += 1;
    }

    pub async fn step_completed(&self, workflow_id: Uuid, step_id: Uuid, skipped: bool) {
        let mut inner = self.inner.write().await;
        let stats = inner.steps.entry((workflow_id, step_id)).or_default();
        stats.completed += 1;
        if skipped {
            stats.skipped += 1;
        }
    }

    /// Record a message handed to the delivery provider, indexing the
    /// delivery id so later callbacks can be attributed. Idempotent per
    /// delivery id: a crash-retried pass reporting the same delivery again
    /// does not double-count.
    pub async fn message_sent(&self, workflow_id: Uuid, step_id: Uuid, delivery_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.deliveries.contains_key(delivery_id) {
            return;
        }
        inner.messages.entry((workflow_id, step_id)).or_default().sent += 1;
        inner
            .deliveries
            .insert(delivery_id.to_string(), (workflow_id, step_id));

        // Fold in callbacks that raced ahead of the send record.
        if let Some(pending) = inner.pending_events.remove(delivery_id) {
            for event in pending {
                apply_event(&mut inner, delivery_id, event);
            }
        }
    }

    /// Idempotent out-of-band delivery callback. Unknown delivery ids are
    /// buffered until the matching send is recorded.
    pub async fn record_delivery_event(&self, delivery_id: &str, event: DeliveryEvent) {
        let mut inner = self.inner.write().await;
        if !inner
            .seen_events
            .insert((delivery_id.to_string(), event))
        {
            return;
        }

        if inner.deliveries.contains_key(delivery_id) {
            apply_event(&mut inner, delivery_id, event);
        } else {
            inner
                .pending_events
                .entry(delivery_id.to_string())
                .or_default()
                .push(event);
        }
    }

    pub async fn workflow_stats(&self, workflow_id: Uuid) -> WorkflowStats {
        self.inner
            .read()
            .await
            .workflows
            .get(&workflow_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn step_stats(&self, workflow_id: Uuid, step_id: Uuid) -> StepStats {
        self.inner
            .read()
            .await
            .steps
            .get(&(workflow_id, step_id))
            .copied()
            .unwrap_or_default()
    }

    pub async fn message_stats(&self, workflow_id: Uuid, step_id: Uuid) -> MessageStats {
        self.inner
            .read()
            .await
            .messages
            .get(&(workflow_id, step_id))
            .copied()
            .unwrap_or_default()
    }
}

fn apply_event(inner: &mut Counters, delivery_id: &str, event: DeliveryEvent) {
    let Some(&key) = inner.deliveries.get(delivery_id) else {
        return;
    };
    let stats = inner.messages.entry(key).or_default();
    match event {
        DeliveryEvent::Delivered => stats.delivered += 1,
        DeliveryEvent::Opened => stats.opened += 1,
        DeliveryEvent::Clicked => stats.clicked += 1,
        DeliveryEvent::Bounced => stats.bounced += 1,
        DeliveryEvent::Failed => stats.failed += 1,
    }
}
