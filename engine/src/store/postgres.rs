// Postgres-backed execution store. Position updates and log appends share a
// transaction; claims use claimed_until with SKIP LOCKED so workers never
// process the same execution concurrently.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{AdvanceOutcome, AdvanceRequest, ExecutionStore, FrequencyCapStore};
use crate::workflows::execution::{Execution, ExecutionLogEntry, ExecutionStatus, LogOutcome};

type ExecutionRow = (
    Uuid,                  // id
    Uuid,                  // workflow_id
    i32,                   // workflow_version
    Uuid,                  // contact_id
    String,                // status
    Option<Uuid>,          // current_step_id
    Option<DateTime<Utc>>, // wake_at
    i32,                   // steps_taken
    JsonValue,             // context
    DateTime<Utc>,         // started_at
    Option<DateTime<Utc>>, // completed_at
);

const EXECUTION_COLUMNS: &str = "id, workflow_id, workflow_version, contact_id, status, \
     current_step_id, wake_at, steps_taken, context, started_at, completed_at";

fn row_to_execution(row: ExecutionRow) -> StoreResult<Execution> {
    let status = ExecutionStatus::parse(&row.4)
        .ok_or_else(|| StoreError::Database(sqlx::Error::Decode(
            format!("unknown execution status '{}'", row.4).into(),
        )))?;
    Ok(Execution {
        id: row.0,
        workflow_id: row.1,
        workflow_version: row.2,
        contact_id: row.3,
        status,
        current_step_id: row.5,
        wake_at: row.6,
        steps_taken: row.7 as u32,
        context: row.8,
        started_at: row.9,
        completed_at: row.10,
    })
}

pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn finish(
        &self,
        id: Uuid,
        entry: ExecutionLogEntry,
        status: ExecutionStatus,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, completed_at = NOW(), wake_at = NULL, claimed_until = NULL
            WHERE id = $1 AND status IN ('running', 'paused')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(id));
        }

        insert_log_entry(&mut tx, id, &entry, None).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_log_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    execution_id: Uuid,
    entry: &ExecutionLogEntry,
    idempotency_key: Option<&str>,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO execution_log
        (execution_id, step_id, action, outcome, detail, data, idempotency_key, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(execution_id)
    .bind(entry.step_id)
    .bind(&entry.action)
    .bind(entry.outcome.as_str())
    .bind(&entry.detail)
    .bind(&entry.data)
    .bind(idempotency_key)
    .bind(entry.timestamp)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create(&self, execution: &Execution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
            (id, workflow_id, workflow_version, contact_id, status, current_step_id,
             wake_at, steps_taken, context, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.workflow_version)
        .bind(execution.contact_id)
        .bind(execution.status.as_str())
        .bind(execution.current_step_id)
        .bind(execution.wake_at)
        .bind(execution.steps_taken as i32)
        .bind(&execution.context)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Execution> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_execution)
            .transpose()?
            .ok_or(StoreError::NotFound(id))
    }

    async fn advance(&self, request: AdvanceRequest) -> StoreResult<AdvanceOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM execution_log WHERE execution_id = $1 AND idempotency_key = $2",
        )
        .bind(request.execution_id)
        .bind(&request.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Ok(AdvanceOutcome::AlreadyApplied);
        }

        let updated = sqlx::query(
            r#"
            UPDATE executions
            SET current_step_id = $2,
                wake_at = NULL,
                steps_taken = steps_taken + 1,
                context = COALESCE($3, context)
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(request.execution_id)
        .bind(request.new_step_id)
        .bind(&request.context)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(request.execution_id));
        }

        insert_log_entry(
            &mut tx,
            request.execution_id,
            &request.entry,
            Some(&request.idempotency_key),
        )
        .await?;
        tx.commit().await?;
        Ok(AdvanceOutcome::Applied)
    }

    async fn park(&self, id: Uuid, wake_at: DateTime<Utc>) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE executions
            SET wake_at = $2, claimed_until = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(wake_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(id));
        }
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
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'paused', claimed_until = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(id));
        }

        insert_log_entry(&mut tx, id, &entry, None).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn resume_for_workflow(&self, workflow_id: Uuid) -> StoreResult<u64> {
        let updated = sqlx::query(
            "UPDATE executions SET status = 'running' WHERE workflow_id = $1 AND status = 'paused'",
        )
        .bind(workflow_id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_ttl: Duration,
    ) -> StoreResult<Vec<Execution>> {
        let expiry = now
            + chrono::Duration::from_std(claim_ttl).unwrap_or(chrono::Duration::seconds(60));

        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE executions
            SET claimed_until = $2
            WHERE id IN (
                SELECT id FROM executions
                WHERE status = 'running'
                  AND (wake_at IS NULL OR wake_at <= $1)
                  AND (claimed_until IS NULL OR claimed_until <= $1)
                ORDER BY started_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(expiry)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_execution).collect()
    }

    async fn release(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE executions SET claimed_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_for_contact(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        statuses: &[ExecutionStatus],
    ) -> StoreResult<u64> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM executions
            WHERE workflow_id = $1 AND contact_id = $2 AND status = ANY($3)
            "#,
        )
        .bind(workflow_id)
        .bind(contact_id)
        .bind(&statuses)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 as u64)
    }

    async fn find_for_contact(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
    ) -> StoreResult<Vec<Execution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM executions
            WHERE workflow_id = $1 AND contact_id = $2
            ORDER BY started_at ASC
            "#
        ))
        .bind(workflow_id)
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_execution).collect()
    }

    async fn log_entries(&self, id: Uuid) -> StoreResult<Vec<ExecutionLogEntry>> {
        let rows: Vec<(Uuid, String, String, String, Option<JsonValue>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT step_id, action, outcome, detail, data, created_at
                FROM execution_log
                WHERE execution_id = $1
                ORDER BY id ASC
                "#,
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ExecutionLogEntry {
                timestamp: row.5,
                step_id: row.0,
                action: row.1,
                outcome: LogOutcome::parse(&row.2).unwrap_or(LogOutcome::Failure),
                detail: row.3,
                data: row.4,
            })
            .collect())
    }
}

pub struct PgFrequencyCapStore {
    pool: PgPool,
}

impl PgFrequencyCapStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FrequencyCapStore for PgFrequencyCapStore {
    async fn try_reserve(&self, contact_id: Uuid, day: NaiveDate, cap: u32) -> StoreResult<bool> {
        if cap == 0 {
            return Ok(false);
        }

        // Single statement compare-and-increment; the WHERE on the conflict
        // arm makes the reservation race-free.
        let reserved: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO contact_send_counts (contact_id, day, count)
            VALUES ($1, $2, 1)
            ON CONFLICT (contact_id, day) DO UPDATE
            SET count = contact_send_counts.count + 1
            WHERE contact_send_counts.count < $3
            RETURNING count
            "#,
        )
        .bind(contact_id)
        .bind(day)
        .bind(cap as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reserved.is_some())
    }

    async fn count(&self, contact_id: Uuid, day: NaiveDate) -> StoreResult<u32> {
        let count: Option<(i32,)> = sqlx::query_as(
            "SELECT count FROM contact_send_counts WHERE contact_id = $1 AND day = $2",
        )
        .bind(contact_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.map(|c| c.0 as u32).unwrap_or(0))
    }
}
