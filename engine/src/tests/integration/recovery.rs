// Restart resumability: a parked execution survives the death of the process
// that parked it and finishes under a freshly-constructed engine.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::store::ExecutionStore;
use crate::tests::helpers::TestHarness;
use crate::workflows::definition::{
    ActionKind, MessageConfig, RetryPolicy, Step, StepKind, TriggerSpec, WaitConfig, WaitUnit,
    WorkflowDefinition,
};
use crate::workflows::engine::WorkflowEngine;
use crate::workflows::execution::ExecutionStatus;
use crate::workflows::triggers::TriggerKind;

fn drip_workflow() -> WorkflowDefinition {
    let tag = Step::new("tag", StepKind::Action(ActionKind::AddTag { tag: "nurtured".into() }));
    let wait = Step::new(
        "wait",
        StepKind::Wait(WaitConfig {
            amount: 2,
            unit: WaitUnit::Hours,
        }),
    )
    .connect(tag.id);
    let message = Step::new(
        "drip",
        StepKind::Message(MessageConfig {
            template_id: Uuid::new_v4(),
            retry: RetryPolicy::none(),
        }),
    )
    .connect(wait.id);
    WorkflowDefinition::new(
        Uuid::new_v4(),
        "drip",
        TriggerSpec::new(TriggerKind::Manual),
        vec![message, wait, tag],
    )
}

#[tokio::test]
async fn test_parked_execution_resumes_under_a_new_engine() {
    let harness = TestHarness::new();
    let workflow = drip_workflow();
    let workflow_id = workflow.id;
    harness.engine.publish(workflow.clone()).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();
    let contact = harness.add_contact("ada@example.com").await;

    let execution_id = harness
        .engine
        .trigger(workflow_id, contact.id, json!({}))
        .await
        .unwrap()
        .unwrap();

    let t0 = Utc::now();
    harness.engine.process_due(t0).await.unwrap();

    let parked = harness.store.get(execution_id).await.unwrap();
    assert_eq!(parked.status, ExecutionStatus::Running);
    assert!(parked.wake_at.is_some());

    // "Restart": a brand-new engine over the same store and collaborators.
    // The host re-registers the same published definitions on boot.
    let restarted = Arc::new(WorkflowEngine::new(
        harness.store.clone(),
        harness.caps.clone(),
        harness.renderer.clone(),
        harness.delivery.clone(),
        harness.contacts.clone(),
        harness.webhooks.clone(),
        EngineConfig::default(),
    ));
    restarted.publish(workflow).await.unwrap();
    restarted.activate(workflow_id).await.unwrap();

    // Still early: nothing due.
    let early = restarted
        .process_due(t0 + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(early, 0);

    // Past the wake time the new engine drains it to completion.
    restarted
        .process_due(t0 + chrono::Duration::hours(3))
        .await
        .unwrap();

    let execution = harness.store.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let log = harness.store.log_entries(execution_id).await.unwrap();
    let actions: Vec<&str> = log.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["message", "wait", "action"]);

    let contact = harness.contacts.snapshot(contact.id).await.unwrap();
    assert!(contact.has_tag("nurtured"));
}

#[tokio::test]
async fn test_unregistered_version_fails_loudly_not_silently() {
    // If the host forgets to re-register a version after restart, affected
    // executions fail with an explanatory log entry instead of vanishing.
    let harness = TestHarness::new();
    let workflow = drip_workflow();
    let workflow_id = workflow.id;
    harness.engine.publish(workflow).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();
    let contact = harness.add_contact("ada@example.com").await;

    let execution_id = harness
        .engine
        .trigger(workflow_id, contact.id, json!({}))
        .await
        .unwrap()
        .unwrap();

    let amnesiac = Arc::new(WorkflowEngine::new(
        harness.store.clone(),
        harness.caps.clone(),
        harness.renderer.clone(),
        harness.delivery.clone(),
        harness.contacts.clone(),
        harness.webhooks.clone(),
        EngineConfig::default(),
    ));
    amnesiac.process_due(Utc::now()).await.unwrap();

    let execution = harness.store.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);

    let log = harness.store.log_entries(execution_id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].detail.contains("not registered"));
}
