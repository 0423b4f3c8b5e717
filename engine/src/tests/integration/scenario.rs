// End-to-end run of the welcome journey:
// message -> wait 1 day -> condition on opened_welcome -> upsell / tag "cold".

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::store::ExecutionStore;
use crate::tests::fixtures::welcome_scenario;
use crate::tests::helpers::TestHarness;
use crate::workflows::execution::{ExecutionStatus, LogOutcome};
use crate::workflows::triggers::TriggerEvent;

#[tokio::test]
async fn test_contact_who_never_opens_gets_tagged_cold() {
    let harness = TestHarness::new();
    let fixture = welcome_scenario(Uuid::new_v4());
    let workflow_id = fixture.workflow.id;
    harness.engine.publish(fixture.workflow.clone()).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();

    let contact = harness.add_contact("ada@example.com").await;
    let event = TriggerEvent::contact_signed_up(contact.id, &contact.email, "landing-page");
    let started = harness.engine.handle_event(&event).await.unwrap();
    assert_eq!(started.len(), 1);
    let execution_id = started[0];

    let t0 = Utc::now();

    // First pass: welcome goes out, execution parks on the wait step.
    harness.engine.process_due(t0).await.unwrap();
    assert_eq!(harness.delivery.unique_sends().await, 1);

    let execution = harness.store.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.current_step_id, Some(fixture.wait_step));
    let wake_at = execution.wake_at.expect("parked execution has a wake time");
    assert_eq!(wake_at, t0 + chrono::Duration::days(1));

    // Ticks before the wake time must not advance it.
    let early = harness
        .engine
        .process_due(t0 + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(early, 0);
    assert_eq!(
        harness.store.get(execution_id).await.unwrap().current_step_id,
        Some(fixture.wait_step)
    );

    // The first tick at/after the wake time drains it to completion: the
    // condition is false (never opened), so the contact is tagged cold.
    harness
        .engine
        .process_due(t0 + chrono::Duration::hours(25))
        .await
        .unwrap();

    let execution = harness.store.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.completed_at.is_some());

    let log = harness.store.log_entries(execution_id).await.unwrap();
    assert_eq!(log.len(), 4, "expected exactly 4 log entries: {log:#?}");
    let actions: Vec<&str> = log.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["message", "wait", "condition", "action"]);
    assert!(log.iter().all(|e| e.outcome == LogOutcome::Success));

    // Only the welcome went out; no upsell for a cold contact.
    assert_eq!(harness.delivery.unique_sends().await, 1);
    let contact = harness.contacts.snapshot(contact.id).await.unwrap();
    assert!(contact.has_tag("cold"));

    let stats = harness.engine.analytics().workflow_stats(workflow_id).await;
    assert_eq!(stats.entered, 1);
    assert_eq!(stats.completed, 1);
    let message_stats = harness
        .engine
        .analytics()
        .message_stats(workflow_id, fixture.welcome_step)
        .await;
    assert_eq!(message_stats.sent, 1);
}

#[tokio::test]
async fn test_contact_who_opened_gets_the_upsell() {
    let harness = TestHarness::new();
    let fixture = welcome_scenario(Uuid::new_v4());
    let workflow_id = fixture.workflow.id;
    harness.engine.publish(fixture.workflow.clone()).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();

    let contact = harness.add_contact("grace@example.com").await;
    // Direct enrollment with an open already recorded in the payload.
    let execution_id = harness
        .engine
        .trigger(workflow_id, contact.id, json!({"opened_welcome": true}))
        .await
        .unwrap()
        .unwrap();

    let t0 = Utc::now();
    harness.engine.process_due(t0).await.unwrap();
    harness
        .engine
        .process_due(t0 + chrono::Duration::days(1))
        .await
        .unwrap();

    let execution = harness.store.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let log = harness.store.log_entries(execution_id).await.unwrap();
    let actions: Vec<&str> = log.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["message", "wait", "condition", "message"]);

    // Welcome and upsell both delivered.
    assert_eq!(harness.delivery.unique_sends().await, 2);
    let contact = harness.contacts.snapshot(contact.id).await.unwrap();
    assert!(!contact.has_tag("cold"));
}
