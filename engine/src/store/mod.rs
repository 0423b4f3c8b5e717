// Durable storage contracts for executions and the shared frequency-cap
// counters. The store's "due" view is the scheduler's source of truth; no
// scheduling state lives only in memory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::workflows::execution::{Execution, ExecutionLogEntry, ExecutionStatus};

pub use memory::{MemoryExecutionStore, MemoryFrequencyCapStore};
pub use postgres::{PgExecutionStore, PgFrequencyCapStore};

/// An atomic position update plus its log entry.
#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    pub execution_id: Uuid,
    /// New position for the execution (completion goes through `complete`).
    pub new_step_id: Uuid,
    pub entry: ExecutionLogEntry,
    /// Duplicate `(execution_id, idempotency_key)` pairs are a no-op.
    pub idempotency_key: String,
    /// Updated execution context, when the step changed it.
    pub context: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Applied,
    /// The same advance was already persisted (crash-retry); no second log
    /// entry was written.
    AlreadyApplied,
}

/// Durable CRUD over executions plus the due/claim index.
///
/// All mutations are atomic with their accompanying log append: the store
/// never moves an execution without recording why.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: &Execution) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Execution>;

    /// Move a running execution to a new step, appending the log entry and
    /// bumping `steps_taken`, all atomically. Idempotent per request key.
    async fn advance(&self, request: AdvanceRequest) -> StoreResult<AdvanceOutcome>;

    /// Park a running execution until `wake_at`, releasing its claim. The
    /// position does not change, so no log entry is written.
    async fn park(&self, id: Uuid, wake_at: DateTime<Utc>) -> StoreResult<()>;

    async fn complete(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()>;

    async fn fail(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()>;

    /// Mark an execution exited (entry conditions no longer hold).
    async fn exit(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()>;

    /// Suspend a running execution (workflow paused with
    /// `pause_suspends_in_flight`), releasing its claim.
    async fn suspend(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()>;

    /// Resume every suspended execution of a workflow; returns how many.
    async fn resume_for_workflow(&self, workflow_id: Uuid) -> StoreResult<u64>;

    /// Claim up to `limit` due executions: running, wake time passed (or
    /// unset), and not claimed by a live worker. Claims expire after
    /// `claim_ttl` so work survives a crashed worker.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_ttl: Duration,
    ) -> StoreResult<Vec<Execution>>;

    /// Release a claim without changing execution state; the execution stays
    /// due and will be reclaimed on the next drain.
    async fn release(&self, id: Uuid) -> StoreResult<()>;

    async fn count_for_contact(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        statuses: &[ExecutionStatus],
    ) -> StoreResult<u64>;

    async fn find_for_contact(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Vec<Execution>>;

    /// Full append-ordered log for one execution.
    async fn log_entries(&self, id: Uuid) -> StoreResult<Vec<ExecutionLogEntry>>;
}

/// Shared per-contact daily send counters.
#[async_trait]
pub trait FrequencyCapStore: Send + Sync {
    /// Reserve one send slot for the contact on the given day if fewer than
    /// `cap` are taken. Compare-and-increment; safe under concurrency.
    async fn try_reserve(&self, contact_id: Uuid, day: NaiveDate, cap: u32) -> StoreResult<bool>;

    /// Current count for inspection.
    async fn count(&self, contact_id: Uuid, day: NaiveDate) -> StoreResult<u32>;
}
