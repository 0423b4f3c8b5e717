use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

/// Subscription state of a contact as known by the contact system of record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Subscribed,
    Unsubscribed,
    Suppressed,
    Bounced,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Suppressed => "suppressed",
            Self::Bounced => "bounced",
        }
    }
}

/// Point-in-time view of a contact, owned by the external contact store.
///
/// The engine never writes to a contact directly; it mutates its own copy of
/// the snapshot and reconciles through `ContactMutation`s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactSnapshot {
    pub id: Uuid,
    pub email: String,
    pub subscription_status: SubscriptionStatus,
    pub tags: Vec<String>,
    pub attributes: HashMap<String, JsonValue>,
    pub updated_at: DateTime<Utc>,
}

impl ContactSnapshot {
    pub fn new(id: Uuid, email: &str) -> Self {
        Self {
            id,
            email: email.to_string(),
            subscription_status: SubscriptionStatus::Subscribed,
            tags: Vec::new(),
            attributes: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.subscription_status = status;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn with_attribute(mut self, name: &str, value: JsonValue) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Apply a mutation to this snapshot in place.
    pub fn apply(&mut self, mutation: &ContactMutation) {
        match mutation {
            ContactMutation::AddTag { tag } => {
                if !self.has_tag(tag) {
                    self.tags.push(tag.clone());
                }
            }
            ContactMutation::RemoveTag { tag } => {
                self.tags.retain(|t| t != tag);
            }
            ContactMutation::SetAttribute { field, value } => {
                self.attributes.insert(field.clone(), value.clone());
            }
        }
    }
}

/// A change the engine asks the contact store to apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContactMutation {
    AddTag { tag: String },
    RemoveTag { tag: String },
    SetAttribute { field: String, value: JsonValue },
}

/// Rendered message content handed to the delivery provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageContent {
    pub subject: String,
    pub body: String,
}

/// Receipt returned by the delivery provider for an accepted send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-side identifier; later delivery callbacks reference it.
    pub delivery_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Out-of-band delivery lifecycle events reported by provider callbacks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEvent {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Failed,
}
