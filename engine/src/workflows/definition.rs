// Workflow definitions - immutable step graphs plus their validation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, ValidationError, ValidationResult};
use crate::workflows::conditions::Predicate;
use crate::workflows::triggers::TriggerKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }
}

/// What kind of event starts this workflow, plus an optional payload filter.
///
/// Filter semantics: every key present in `filters` must equal the same key in
/// the trigger payload for the event to match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub kind: TriggerKind,
    #[serde(default)]
    pub filters: JsonValue,
}

impl TriggerSpec {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            filters: JsonValue::Null,
        }
    }

    pub fn with_filters(mut self, filters: JsonValue) -> Self {
        self.filters = filters;
        self
    }

    pub fn matches(&self, payload: &JsonValue) -> bool {
        let Some(filters) = self.filters.as_object() else {
            return true;
        };
        filters
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }
}

/// Per-workflow behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// How many lifetime executions one contact may get; 0 means unlimited.
    pub max_executions_per_contact: u32,
    /// Whether a contact may have more than one running execution at once.
    pub allow_concurrent_runs: bool,
    /// Refuse entry and skip sends for contacts that are not subscribed.
    pub respect_unsubscribes: bool,
    pub frequency_cap: Option<FrequencyCap>,
    pub track_opens: bool,
    pub track_clicks: bool,
    /// When true, pausing the workflow also suspends in-flight executions
    /// until the workflow is reactivated. The default mirrors the classic
    /// behavior: pause stops new entries only.
    pub pause_suspends_in_flight: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_executions_per_contact: 1,
            allow_concurrent_runs: false,
            respect_unsubscribes: true,
            frequency_cap: None,
            track_opens: true,
            track_clicks: true,
            pause_suspends_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrequencyCap {
    /// Maximum messages a contact may receive per calendar day.
    pub max_per_day: u32,
}

/// Retry behavior for steps that call out to collaborators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_secs: 0,
        }
    }

    /// Exponential backoff delay before the given retry (1-based attempt).
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        std::time::Duration::from_secs(self.base_delay_secs.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    pub template_id: Uuid,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaitConfig {
    pub amount: u32,
    pub unit: WaitUnit,
}

impl WaitConfig {
    pub fn duration(&self) -> chrono::Duration {
        let amount = self.amount as i64;
        match self.unit {
            WaitUnit::Minutes => chrono::Duration::minutes(amount),
            WaitUnit::Hours => chrono::Duration::hours(amount),
            WaitUnit::Days => chrono::Duration::days(amount),
            WaitUnit::Weeks => chrono::Duration::weeks(amount),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConditionConfig {
    pub predicates: Vec<Predicate>,
}

/// Contact-side effects an Action step can perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    AddTag {
        tag: String,
    },
    RemoveTag {
        tag: String,
    },
    UpdateField {
        field: String,
        value: JsonValue,
    },
    Webhook {
        url: String,
        #[serde(default)]
        retry: RetryPolicy,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitVariant {
    pub name: String,
    pub percent: u8,
    pub template_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitTestConfig {
    pub variants: Vec<SplitVariant>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Step payload, one variant per step kind. Each variant carries only the
/// fields relevant to that kind; processors dispatch by pattern match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Message(MessageConfig),
    Wait(WaitConfig),
    Condition(ConditionConfig),
    Action(ActionKind),
    SplitTest(SplitTestConfig),
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Wait(_) => "wait",
            Self::Condition(_) => "condition",
            Self::Action(_) => "action",
            Self::SplitTest(_) => "split_test",
        }
    }
}

/// Edge label constraining when a connection is taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    Success,
    Failure,
    True,
    False,
    Variant(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConnection {
    pub target_step_id: Uuid,
    pub guard: Option<Guard>,
}

impl StepConnection {
    pub fn to(target_step_id: Uuid) -> Self {
        Self {
            target_step_id,
            guard: None,
        }
    }

    pub fn guarded(target_step_id: Uuid, guard: Guard) -> Self {
        Self {
            target_step_id,
            guard: Some(guard),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub name: String,
    pub kind: StepKind,
    #[serde(default)]
    pub connections: Vec<StepConnection>,
}

impl Step {
    pub fn new(name: &str, kind: StepKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            connections: Vec::new(),
        }
    }

    pub fn connect(mut self, target_step_id: Uuid) -> Self {
        self.connections.push(StepConnection::to(target_step_id));
        self
    }

    pub fn connect_guarded(mut self, target_step_id: Uuid, guard: Guard) -> Self {
        self.connections
            .push(StepConnection::guarded(target_step_id, guard));
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub version: i32,
    pub status: WorkflowStatus,
    pub trigger: TriggerSpec,
    pub steps: Vec<Step>,
    pub settings: WorkflowSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn new(owner_id: Uuid, name: &str, trigger: TriggerSpec, steps: Vec<Step>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            version: 1,
            status: WorkflowStatus::Draft,
            trigger,
            steps,
            settings: WorkflowSettings::default(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn step(&self, step_id: Uuid) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The unique step with no incoming connections. Only meaningful on a
    /// validated definition.
    pub fn entry_step(&self) -> Option<&Step> {
        let mut targets: HashSet<Uuid> = HashSet::new();
        for step in &self.steps {
            for conn in &step.connections {
                targets.insert(conn.target_step_id);
            }
        }
        self.steps.iter().find(|s| !targets.contains(&s.id))
    }

    /// Structural validation, run once when a definition is published.
    /// Execution-time code may assume all of these invariants hold.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyWorkflow);
        }

        let mut ids: HashSet<Uuid> = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id) {
                return Err(ValidationError::DuplicateStepId(step.id));
            }
        }

        for step in &self.steps {
            for conn in &step.connections {
                if !ids.contains(&conn.target_step_id) {
                    return Err(ValidationError::DanglingConnection {
                        step_id: step.id,
                        target: conn.target_step_id,
                    });
                }
            }
        }

        let mut targets: HashSet<Uuid> = HashSet::new();
        for step in &self.steps {
            for conn in &step.connections {
                targets.insert(conn.target_step_id);
            }
        }
        let entries: Vec<&Step> = self.steps.iter().filter(|s| !targets.contains(&s.id)).collect();
        match entries.len() {
            0 => return Err(ValidationError::NoEntryStep),
            1 => {}
            n => return Err(ValidationError::MultipleEntrySteps(n)),
        }

        for step in &self.steps {
            if let StepKind::SplitTest(config) = &step.kind {
                if config.variants.is_empty() {
                    return Err(ValidationError::EmptySplitTest(step.id));
                }
                let sum: u32 = config.variants.iter().map(|v| v.percent as u32).sum();
                if sum != 100 {
                    return Err(ValidationError::SplitPercentagesInvalid {
                        step_id: step.id,
                        sum,
                    });
                }
            }
        }

        Ok(())
    }
}

/// In-memory registry of published workflow versions.
///
/// Published versions are immutable; only status may change afterwards, and a
/// status change applies to every version of the workflow. Hosts re-register
/// definitions at startup; executions persist the exact version they started
/// with and resolve steps against it forever.
pub struct WorkflowRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    versions: HashMap<(Uuid, i32), Arc<WorkflowDefinition>>,
    latest: HashMap<Uuid, i32>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Validate and store a definition as the next version of its workflow id.
    /// Returns the version number assigned.
    pub async fn publish(&self, mut definition: WorkflowDefinition) -> EngineResult<i32> {
        definition.validate()?;

        let mut inner = self.inner.write().await;
        let version = inner.latest.get(&definition.id).map(|v| v + 1).unwrap_or(1);
        definition.version = version;
        inner.latest.insert(definition.id, version);
        inner
            .versions
            .insert((definition.id, version), Arc::new(definition));
        Ok(version)
    }

    pub async fn get(&self, id: Uuid, version: i32) -> Option<Arc<WorkflowDefinition>> {
        self.inner.read().await.versions.get(&(id, version)).cloned()
    }

    pub async fn latest(&self, id: Uuid) -> Option<Arc<WorkflowDefinition>> {
        let inner = self.inner.read().await;
        let version = *inner.latest.get(&id)?;
        inner.versions.get(&(id, version)).cloned()
    }

    /// All latest versions whose trigger kind matches.
    pub async fn matching_trigger(&self, kind: TriggerKind) -> Vec<Arc<WorkflowDefinition>> {
        let inner = self.inner.read().await;
        inner
            .latest
            .iter()
            .filter_map(|(id, version)| inner.versions.get(&(*id, *version)))
            .filter(|w| w.trigger.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn set_status(&self, id: Uuid, status: WorkflowStatus) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.latest.contains_key(&id) {
            return Err(EngineError::WorkflowNotFound(id));
        }

        let keys: Vec<(Uuid, i32)> = inner
            .versions
            .keys()
            .filter(|(wid, _)| *wid == id)
            .cloned()
            .collect();
        for key in keys {
            let updated = {
                let current = inner.versions.get(&key).expect("key listed above");
                let from = current.status;
                let allowed = matches!(
                    (from, status),
                    (WorkflowStatus::Draft, WorkflowStatus::Active)
                        | (WorkflowStatus::Active, WorkflowStatus::Paused)
                        | (WorkflowStatus::Paused, WorkflowStatus::Active)
                        | (WorkflowStatus::Active, WorkflowStatus::Archived)
                        | (WorkflowStatus::Paused, WorkflowStatus::Archived)
                        | (WorkflowStatus::Draft, WorkflowStatus::Archived)
                ) || from == status;
                if !allowed {
                    return Err(EngineError::InvalidStatusChange { from, to: status });
                }
                let mut updated = (**current).clone();
                updated.status = status;
                updated.updated_at = Some(Utc::now());
                updated
            };
            inner.versions.insert(key, Arc::new(updated));
        }
        Ok(())
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
