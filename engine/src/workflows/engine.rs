// Workflow engine - admission, step orchestration, and owner visibility.
//
// The engine is constructed with every collaborator injected; it owns no
// global state and can be instantiated multiple times against the same store.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analytics::AnalyticsAggregator;
use crate::collaborators::{ContactStore, DeliveryProvider, TemplateRenderer, WebhookCaller};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{AdvanceOutcome, AdvanceRequest, ExecutionStore, FrequencyCapStore};
use crate::workflows::definition::{
    WorkflowDefinition, WorkflowRegistry, WorkflowStatus,
};
use crate::workflows::execution::{Execution, ExecutionLogEntry, ExecutionStatus, LogOutcome};
use crate::workflows::processors::{self, ProcessOutcome, ProcessorContext};
use crate::workflows::triggers::{Decision, TriggerEvent, TriggerGate};

pub struct WorkflowEngine {
    registry: WorkflowRegistry,
    gate: TriggerGate,
    store: Arc<dyn ExecutionStore>,
    caps: Arc<dyn FrequencyCapStore>,
    renderer: Arc<dyn TemplateRenderer>,
    delivery: Arc<dyn DeliveryProvider>,
    contacts: Arc<dyn ContactStore>,
    webhooks: Arc<dyn WebhookCaller>,
    analytics: Arc<AnalyticsAggregator>,
    config: EngineConfig,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        caps: Arc<dyn FrequencyCapStore>,
        renderer: Arc<dyn TemplateRenderer>,
        delivery: Arc<dyn DeliveryProvider>,
        contacts: Arc<dyn ContactStore>,
        webhooks: Arc<dyn WebhookCaller>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: WorkflowRegistry::new(),
            gate: TriggerGate::new(store.clone()),
            store,
            caps,
            renderer,
            delivery,
            contacts,
            webhooks,
            analytics: Arc::new(AnalyticsAggregator::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analytics(&self) -> &Arc<AnalyticsAggregator> {
        &self.analytics
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    // ===== Definition lifecycle =====

    /// Validate and register a definition; returns (workflow id, version).
    pub async fn publish(&self, definition: WorkflowDefinition) -> EngineResult<(Uuid, i32)> {
        let id = definition.id;
        let version = self.registry.publish(definition).await?;
        info!(workflow_id = %id, version, "workflow published");
        Ok((id, version))
    }

    pub async fn activate(&self, workflow_id: Uuid) -> EngineResult<()> {
        self.registry
            .set_status(workflow_id, WorkflowStatus::Active)
            .await?;
        let resumed = self.store.resume_for_workflow(workflow_id).await?;
        if resumed > 0 {
            info!(workflow_id = %workflow_id, resumed, "resumed suspended executions");
        }
        Ok(())
    }

    /// Pause: stops new entries. In-flight executions keep running unless the
    /// workflow's settings opt into suspension.
    pub async fn pause(&self, workflow_id: Uuid) -> EngineResult<()> {
        self.registry
            .set_status(workflow_id, WorkflowStatus::Paused)
            .await
    }

    pub async fn archive(&self, workflow_id: Uuid) -> EngineResult<()> {
        self.registry
            .set_status(workflow_id, WorkflowStatus::Archived)
            .await
    }

    pub async fn workflow(&self, workflow_id: Uuid, version: i32) -> Option<Arc<WorkflowDefinition>> {
        self.registry.get(workflow_id, version).await
    }

    // ===== Admission =====

    /// Fan a trigger event across every registered workflow listening for its
    /// kind. Returns the executions started.
    pub async fn handle_event(&self, event: &TriggerEvent) -> EngineResult<Vec<Uuid>> {
        let contact = self
            .contacts
            .get(event.contact_id)
            .await
            .map_err(|e| EngineError::Contact(e.to_string()))?;

        let mut started = Vec::new();
        for workflow in self.registry.matching_trigger(event.kind).await {
            if !workflow.trigger.matches(&event.payload) {
                continue;
            }
            match self.gate.admit(&workflow, &contact).await? {
                Decision::Admit => {
                    let execution_id = self
                        .start_execution(&workflow, &contact, event.payload.clone())
                        .await?;
                    started.push(execution_id);
                }
                Decision::Reject(reason) => {
                    info!(
                        workflow_id = %workflow.id,
                        contact_id = %contact.id,
                        ?reason,
                        "entry rejected"
                    );
                }
            }
        }
        Ok(started)
    }

    /// Direct entry into one workflow (manual enrollment, API call).
    pub async fn trigger(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        payload: JsonValue,
    ) -> EngineResult<Option<Uuid>> {
        let workflow = self
            .registry
            .latest(workflow_id)
            .await
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        let contact = self
            .contacts
            .get(contact_id)
            .await
            .map_err(|e| EngineError::Contact(e.to_string()))?;

        match self.gate.admit(&workflow, &contact).await? {
            Decision::Admit => {
                let execution_id = self.start_execution(&workflow, &contact, payload).await?;
                Ok(Some(execution_id))
            }
            Decision::Reject(reason) => {
                info!(
                    workflow_id = %workflow.id,
                    contact_id = %contact.id,
                    ?reason,
                    "entry rejected"
                );
                Ok(None)
            }
        }
    }

    async fn start_execution(
        &self,
        workflow: &WorkflowDefinition,
        contact: &cadence_shared::ContactSnapshot,
        payload: JsonValue,
    ) -> EngineResult<Uuid> {
        let entry_step = workflow
            .entry_step()
            .ok_or(EngineError::Validation(
                crate::error::ValidationError::NoEntryStep,
            ))?;

        let execution = Execution::start(
            workflow.id,
            workflow.version,
            contact,
            payload,
            entry_step.id,
        );
        let execution_id = execution.id;
        self.store.create(&execution).await?;

        self.analytics.workflow_entered(workflow.id).await;
        self.analytics.step_entered(workflow.id, entry_step.id).await;

        info!(
            workflow_id = %workflow.id,
            version = workflow.version,
            execution_id = %execution_id,
            contact_id = %contact.id,
            "execution started"
        );
        Ok(execution_id)
    }

    // ===== Step orchestration =====

    /// Drain due executions once: claim bounded batches and process them on a
    /// bounded worker pool until nothing is due. Immediate successors of a
    /// processed step run inside the same pass.
    pub async fn process_due(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let mut processed = 0;
        for _ in 0..self.config.max_batches_per_tick {
            let batch = self
                .store
                .claim_due(now, self.config.drain_limit, self.config.claim_ttl)
                .await?;
            if batch.is_empty() {
                break;
            }
            processed += batch.len();

            futures::stream::iter(batch)
                .for_each_concurrent(self.config.worker_count, |execution| async move {
                    let execution_id = execution.id;
                    if let Err(e) = self.advance_execution(execution, now).await {
                        error!(execution_id = %execution_id, "execution processing failed: {e}");
                    }
                })
                .await;
        }
        Ok(processed)
    }

    /// Advance one claimed execution as far as it will go: through every
    /// immediately-ready step, until it parks, terminates, or exhausts the
    /// per-claim step budget.
    pub async fn advance_execution(
        &self,
        mut execution: Execution,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut budget = self.config.step_budget;

        loop {
            // A stale claim may hand us an execution another pass already
            // finished (crash-retry); there is nothing left to do.
            if execution.status != ExecutionStatus::Running {
                return Ok(());
            }

            if budget == 0 {
                // Still runnable; give the claim back so the next drain
                // continues where we stopped.
                self.store.release(execution.id).await?;
                warn!(execution_id = %execution.id, "step budget exhausted, releasing claim");
                return Ok(());
            }
            budget -= 1;

            let Some(workflow) = self
                .registry
                .get(execution.workflow_id, execution.workflow_version)
                .await
            else {
                let entry = ExecutionLogEntry::new(
                    execution.current_step_id.unwrap_or_else(Uuid::nil),
                    "engine",
                    LogOutcome::Failure,
                    "workflow version is not registered",
                );
                self.store.fail(execution.id, entry).await?;
                self.analytics.workflow_failed(execution.workflow_id).await;
                error!(
                    execution_id = %execution.id,
                    workflow_id = %execution.workflow_id,
                    version = execution.workflow_version,
                    "failing execution: workflow version not registered"
                );
                return Ok(());
            };

            if workflow.status == WorkflowStatus::Paused
                && workflow.settings.pause_suspends_in_flight
            {
                let entry = ExecutionLogEntry::new(
                    execution.current_step_id.unwrap_or_else(Uuid::nil),
                    "engine",
                    LogOutcome::Skipped,
                    "workflow paused, execution suspended",
                );
                self.store.suspend(execution.id, entry).await?;
                return Ok(());
            }

            let Some(step_id) = execution.current_step_id else {
                let entry = ExecutionLogEntry::new(
                    Uuid::nil(),
                    "engine",
                    LogOutcome::Failure,
                    "execution has no current step",
                );
                self.store.fail(execution.id, entry).await?;
                self.analytics.workflow_failed(workflow.id).await;
                return Ok(());
            };
            let Some(step) = workflow.step(step_id) else {
                let entry = ExecutionLogEntry::new(
                    step_id,
                    "engine",
                    LogOutcome::Failure,
                    "current step does not exist in workflow version",
                );
                self.store.fail(execution.id, entry).await?;
                self.analytics.workflow_failed(workflow.id).await;
                return Ok(());
            };

            let deps = ProcessorContext {
                renderer: self.renderer.as_ref(),
                delivery: self.delivery.as_ref(),
                contacts: self.contacts.as_ref(),
                webhooks: self.webhooks.as_ref(),
                caps: self.caps.as_ref(),
                config: &self.config,
            };

            match processors::process(&workflow, &execution, step, now, &deps).await {
                Ok(ProcessOutcome::Park { wake_at }) => {
                    self.store.park(execution.id, wake_at).await?;
                    return Ok(());
                }
                Ok(ProcessOutcome::Advance {
                    next_step_id,
                    entry,
                    context,
                    sent_delivery_id,
                }) => {
                    let skipped = entry.outcome == LogOutcome::Skipped;
                    if let Some(delivery_id) = &sent_delivery_id {
                        self.analytics
                            .message_sent(workflow.id, step.id, delivery_id)
                            .await;
                    }

                    match next_step_id {
                        Some(next) => {
                            let request = AdvanceRequest {
                                execution_id: execution.id,
                                new_step_id: next,
                                idempotency_key: execution.advance_key(step.id),
                                entry,
                                context,
                            };
                            let outcome = self.store.advance(request).await?;
                            if outcome == AdvanceOutcome::Applied {
                                self.analytics
                                    .step_completed(workflow.id, step.id, skipped)
                                    .await;
                                self.analytics.step_entered(workflow.id, next).await;
                            }
                            // Reload so position, context, and the advance
                            // counter reflect what was persisted.
                            execution = self.store.get(execution.id).await?;
                        }
                        None => {
                            self.store.complete(execution.id, entry).await?;
                            self.analytics
                                .step_completed(workflow.id, step.id, skipped)
                                .await;
                            self.analytics.workflow_completed(workflow.id).await;
                            info!(
                                execution_id = %execution.id,
                                workflow_id = %workflow.id,
                                "execution completed"
                            );
                            return Ok(());
                        }
                    }
                }
                Err(step_error) => {
                    let entry = ExecutionLogEntry::new(
                        step.id,
                        step.kind.name(),
                        LogOutcome::Failure,
                        &step_error.to_string(),
                    );
                    self.store.fail(execution.id, entry).await?;
                    self.analytics.workflow_failed(workflow.id).await;
                    error!(
                        execution_id = %execution.id,
                        step_id = %step.id,
                        "step failed: {step_error}"
                    );
                    return Ok(());
                }
            }
        }
    }

    // ===== Host-driven lifecycle =====

    /// Exit an execution whose entry conditions no longer hold (contact
    /// deleted, unsubscribed out-of-band). Host-invoked; always logged.
    pub async fn exit_execution(&self, execution_id: Uuid, reason: &str) -> EngineResult<()> {
        let execution = self.store.get(execution_id).await?;
        let entry = ExecutionLogEntry::new(
            execution.current_step_id.unwrap_or_else(Uuid::nil),
            "exit",
            LogOutcome::Success,
            reason,
        );
        self.store.exit(execution_id, entry).await?;
        self.analytics.workflow_exited(execution.workflow_id).await;
        info!(execution_id = %execution_id, reason, "execution exited");
        Ok(())
    }

    // ===== Owner visibility =====

    pub async fn execution(&self, execution_id: Uuid) -> EngineResult<Execution> {
        Ok(self.store.get(execution_id).await?)
    }

    pub async fn execution_log(
        &self,
        execution_id: Uuid,
    ) -> EngineResult<Vec<ExecutionLogEntry>> {
        Ok(self.store.log_entries(execution_id).await?)
    }

    pub async fn executions_for_contact(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
    ) -> EngineResult<Vec<Execution>> {
        Ok(self.store.find_for_contact(workflow_id, contact_id).await?)
    }
}
