// In-memory execution store. Same semantics as the Postgres store; used by
// the test suite and by embedded hosts that accept losing state on restart.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{AdvanceOutcome, AdvanceRequest, ExecutionStore, FrequencyCapStore};
use crate::workflows::execution::{Execution, ExecutionLogEntry, ExecutionStatus};

#[derive(Debug)]
struct StoredExecution {
    execution: Execution,
    log: Vec<ExecutionLogEntry>,
    applied_keys: HashSet<String>,
    claimed_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryExecutionStore {
    inner: RwLock<HashMap<Uuid, StoredExecution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create(&self, execution: &Execution) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.insert(
            execution.id,
            StoredExecution {
                execution: execution.clone(),
                log: Vec::new(),
                applied_keys: HashSet::new(),
                claimed_until: None,
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Execution> {
        let inner = self.inner.read().await;
        inner
            .get(&id)
            .map(|s| s.execution.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn advance(&self, request: AdvanceRequest) -> StoreResult<AdvanceOutcome> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .get_mut(&request.execution_id)
            .ok_or(StoreError::NotFound(request.execution_id))?;

        if stored.applied_keys.contains(&request.idempotency_key) {
            return Ok(AdvanceOutcome::AlreadyApplied);
        }
        if stored.execution.status != ExecutionStatus::Running {
            return Err(StoreError::InvalidTransition(request.execution_id));
        }

        stored.applied_keys.insert(request.idempotency_key);
        stored.log.push(request.entry);
        stored.execution.current_step_id = Some(request.new_step_id);
        stored.execution.wake_at = None;
        stored.execution.steps_taken += 1;
        if let Some(context) = request.context {
            stored.execution.context = context;
        }
        Ok(AdvanceOutcome::Applied)
    }

    async fn park(&self, id: Uuid, wake_at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if stored.execution.status != ExecutionStatus::Running {
            return Err(StoreError::InvalidTransition(id));
        }
        stored.execution.wake_at = Some(wake_at);
        stored.claimed_until = None;
        Ok(())
    }

    async fn complete(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()> {
        self.finish(id, entry, ExecutionStatus::Completed).await
    }

    async fn fail(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()> {
        self.finish(id, entry, ExecutionStatus::Failed).await
    }

    async fn exit(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()> {
        self.finish(id, entry, ExecutionStatus::Exited).await
    }

    async fn suspend(&self, id: Uuid, entry: ExecutionLogEntry) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if stored.execution.status != ExecutionStatus::Running {
            return Err(StoreError::InvalidTransition(id));
        }
        stored.execution.status = ExecutionStatus::Paused;
        stored.log.push(entry);
        stored.claimed_until = None;
        Ok(())
    }

    async fn resume_for_workflow(&self, workflow_id: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut resumed = 0;
        for stored in inner.values_mut() {
            if stored.execution.workflow_id == workflow_id
                && stored.execution.status == ExecutionStatus::Paused
            {
                stored.execution.status = ExecutionStatus::Running;
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_ttl: Duration,
    ) -> StoreResult<Vec<Execution>> {
        let mut inner = self.inner.write().await;
        let expiry = now + chrono::Duration::from_std(claim_ttl).unwrap_or(chrono::Duration::seconds(60));
        let mut claimed = Vec::new();

        // Deterministic order keeps tests stable.
        let mut due_ids: Vec<Uuid> = inner
            .iter()
            .filter(|(_, s)| {
                s.execution.status == ExecutionStatus::Running
                    && s.execution.wake_at.map(|w| w <= now).unwrap_or(true)
                    && s.claimed_until.map(|c| c <= now).unwrap_or(true)
            })
            .map(|(id, _)| *id)
            .collect();
        due_ids.sort_by_key(|id| {
            inner
                .get(id)
                .map(|s| s.execution.started_at)
                .unwrap_or_else(Utc::now)
        });

        for id in due_ids.into_iter().take(limit) {
            if let Some(stored) = inner.get_mut(&id) {
                stored.claimed_until = Some(expiry);
                claimed.push(stored.execution.clone());
            }
        }
        Ok(claimed)
    }

    async fn release(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        stored.claimed_until = None;
        Ok(())
    }

    async fn count_for_contact(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        statuses: &[ExecutionStatus],
    ) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .values()
            .filter(|s| {
                s.execution.workflow_id == workflow_id
                    && s.execution.contact_id == contact_id
                    && statuses.contains(&s.execution.status)
            })
            .count() as u64)
    }

    async fn find_for_contact(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Vec<Execution>> {
        let inner = self.inner.read().await;
        let mut found: Vec<Execution> = inner
            .values()
            .filter(|s| {
                s.execution.workflow_id == workflow_id && s.execution.contact_id == contact_id
            })
            .map(|s| s.execution.clone())
            .collect();
        found.sort_by_key(|e| e.started_at);
        Ok(found)
    }

    async fn log_entries(&self, id: Uuid) -> StoreResult<Vec<ExecutionLogEntry>> {
        let inner = self.inner.read().await;
        inner
            .get(&id)
            .map(|s| s.log.clone())
            .ok_or(StoreError::NotFound(id))
    }
}

impl MemoryExecutionStore {
    async fn finish(
        &self,
        id: Uuid,
        entry: ExecutionLogEntry,
        status: ExecutionStatus,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if stored.execution.status.is_terminal() {
            return Err(StoreError::InvalidTransition(id));
        }
        stored.execution.status = status;
        stored.execution.completed_at = Some(Utc::now());
        stored.execution.wake_at = None;
        stored.log.push(entry);
        stored.claimed_until = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFrequencyCapStore {
    counts: Mutex<HashMap<(Uuid, NaiveDate), u32>>,
}

impl MemoryFrequencyCapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FrequencyCapStore for MemoryFrequencyCapStore {
    async fn try_reserve(&self, contact_id: Uuid, day: NaiveDate, cap: u32) -> StoreResult<bool> {
        let mut counts = self.counts.lock().await;
        let count = counts.entry((contact_id, day)).or_insert(0);
        if *count < cap {
            *count += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn count(&self, contact_id: Uuid, day: NaiveDate) -> StoreResult<u32> {
        let counts = self.counts.lock().await;
        Ok(*counts.get(&(contact_id, day)).unwrap_or(&0))
    }
}
