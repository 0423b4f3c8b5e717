// Pause semantics: stopping new entries vs. suspending in-flight runs.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::store::ExecutionStore;
use crate::tests::helpers::TestHarness;
use crate::workflows::definition::{
    ActionKind, MessageConfig, RetryPolicy, Step, StepKind, TriggerSpec, WaitConfig, WaitUnit,
    WorkflowDefinition, WorkflowSettings,
};
use crate::workflows::execution::ExecutionStatus;
use crate::workflows::triggers::{TriggerEvent, TriggerKind};

fn wait_workflow(settings: WorkflowSettings) -> WorkflowDefinition {
    let tag = Step::new("tag", StepKind::Action(ActionKind::AddTag { tag: "done".into() }));
    let wait = Step::new(
        "wait",
        StepKind::Wait(WaitConfig {
            amount: 1,
            unit: WaitUnit::Hours,
        }),
    )
    .connect(tag.id);
    let message = Step::new(
        "hello",
        StepKind::Message(MessageConfig {
            template_id: Uuid::new_v4(),
            retry: RetryPolicy::none(),
        }),
    )
    .connect(wait.id);
    WorkflowDefinition::new(
        Uuid::new_v4(),
        "paused journey",
        TriggerSpec::new(TriggerKind::ContactSignedUp),
        vec![message, wait, tag],
    )
    .with_settings(settings)
}

#[tokio::test]
async fn test_pause_stops_new_entries_but_not_in_flight_runs() {
    let harness = TestHarness::new();
    let workflow = wait_workflow(WorkflowSettings::default());
    let workflow_id = workflow.id;
    harness.engine.publish(workflow).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();

    let first = harness.add_contact("first@example.com").await;
    let event = TriggerEvent::contact_signed_up(first.id, &first.email, "landing");
    let started = harness.engine.handle_event(&event).await.unwrap();
    assert_eq!(started.len(), 1);
    let in_flight = started[0];

    let t0 = Utc::now();
    harness.engine.process_due(t0).await.unwrap();

    harness.engine.pause(workflow_id).await.unwrap();

    // New contacts are refused while paused.
    let second = harness.add_contact("second@example.com").await;
    let event = TriggerEvent::contact_signed_up(second.id, &second.email, "landing");
    let started = harness.engine.handle_event(&event).await.unwrap();
    assert!(started.is_empty());

    // The in-flight run finishes normally.
    harness
        .engine
        .process_due(t0 + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(
        harness.store.get(in_flight).await.unwrap().status,
        ExecutionStatus::Completed
    );
    let contact = harness.contacts.snapshot(first.id).await.unwrap();
    assert!(contact.has_tag("done"));
}

#[tokio::test]
async fn test_pause_can_suspend_in_flight_when_configured() {
    let harness = TestHarness::new();
    let workflow = wait_workflow(WorkflowSettings {
        pause_suspends_in_flight: true,
        ..WorkflowSettings::default()
    });
    let workflow_id = workflow.id;
    harness.engine.publish(workflow).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();

    let contact = harness.add_contact("ada@example.com").await;
    let event = TriggerEvent::contact_signed_up(contact.id, &contact.email, "landing");
    let execution_id = harness.engine.handle_event(&event).await.unwrap()[0];

    let t0 = Utc::now();
    harness.engine.process_due(t0).await.unwrap();
    harness.engine.pause(workflow_id).await.unwrap();

    // Next time the execution comes due it suspends instead of advancing.
    harness
        .engine
        .process_due(t0 + chrono::Duration::hours(2))
        .await
        .unwrap();
    let execution = harness.store.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Paused);

    let log = harness.store.log_entries(execution_id).await.unwrap();
    assert!(log.iter().any(|e| e.detail.contains("suspended")));

    // Reactivation resumes it and it finishes.
    harness.engine.activate(workflow_id).await.unwrap();
    harness
        .engine
        .process_due(t0 + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(
        harness.store.get(execution_id).await.unwrap().status,
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn test_exit_execution_records_reason() {
    let harness = TestHarness::new();
    let workflow = wait_workflow(WorkflowSettings::default());
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
    let t0 = Utc::now();
    harness.engine.process_due(t0).await.unwrap();

    harness
        .engine
        .exit_execution(execution_id, "contact deleted upstream")
        .await
        .unwrap();

    let execution = harness.store.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Exited);

    let log = harness.store.log_entries(execution_id).await.unwrap();
    assert!(log.iter().any(|e| e.detail.contains("contact deleted")));

    // An exited execution never comes due again.
    let drained = harness
        .engine
        .process_due(t0 + chrono::Duration::days(1))
        .await
        .unwrap();
    assert_eq!(drained, 0);

    let stats = harness.engine.analytics().workflow_stats(workflow_id).await;
    assert_eq!(stats.exited, 1);
}
