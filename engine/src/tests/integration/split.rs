// Split tests end to end: assignment drives the variant edge, and the
// assignment the engine makes agrees with the pure bucket function.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::store::ExecutionStore;
use crate::tests::fixtures::split_test_workflow;
use crate::tests::helpers::TestHarness;
use crate::workflows::definition::StepKind;
use crate::workflows::execution::ExecutionStatus;
use crate::workflows::processors::split::assign_variant;

#[tokio::test]
async fn test_variant_edge_matches_deterministic_assignment() {
    let harness = TestHarness::new();
    let workflow = split_test_workflow(Uuid::new_v4());
    let workflow_id = workflow.id;
    let split_step = workflow.steps[0].id;
    let variants = match &workflow.steps[0].kind {
        StepKind::SplitTest(config) => config.variants.clone(),
        _ => unreachable!(),
    };
    harness.engine.publish(workflow).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();

    let mut execution_ids = Vec::new();
    let mut contact_ids = Vec::new();
    for i in 0..40 {
        let contact = harness.add_contact(&format!("contact{i}@example.com")).await;
        contact_ids.push(contact.id);
        let execution_id = harness
            .engine
            .trigger(workflow_id, contact.id, json!({}))
            .await
            .unwrap()
            .unwrap();
        execution_ids.push(execution_id);
    }

    harness.engine.process_due(Utc::now()).await.unwrap();

    for (execution_id, contact_id) in execution_ids.iter().zip(&contact_ids) {
        let execution = harness.store.get(*execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);

        let expected = assign_variant(*contact_id, &variants).name.clone();
        let contact = harness.contacts.snapshot(*contact_id).await.unwrap();
        assert!(
            contact.has_tag(&format!("variant-{expected}")),
            "contact {contact_id} should carry its assigned variant tag"
        );

        let log = harness.store.log_entries(*execution_id).await.unwrap();
        let split_entry = log.iter().find(|e| e.action == "split_test").unwrap();
        assert_eq!(
            split_entry.data.as_ref().unwrap()["variant"],
            json!(expected)
        );
    }

    // Every contact got exactly one message through the split step.
    assert_eq!(harness.delivery.unique_sends().await, 40);
    let stats = harness
        .engine
        .analytics()
        .message_stats(workflow_id, split_step)
        .await;
    assert_eq!(stats.sent, 40);
}

#[tokio::test]
async fn test_repeat_enrollment_keeps_the_same_variant() {
    let harness = TestHarness::new();
    let workflow = split_test_workflow(Uuid::new_v4());
    let workflow_id = workflow.id;
    harness.engine.publish(workflow).await.unwrap();
    harness.engine.activate(workflow_id).await.unwrap();

    let contact = harness.add_contact("ada@example.com").await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        let execution_id = harness
            .engine
            .trigger(workflow_id, contact.id, json!({}))
            .await
            .unwrap()
            .unwrap();
        harness.engine.process_due(Utc::now()).await.unwrap();

        let log = harness.store.log_entries(execution_id).await.unwrap();
        let split_entry = log.iter().find(|e| e.action == "split_test").unwrap();
        seen.push(split_entry.data.as_ref().unwrap()["variant"].clone());
    }

    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1], seen[2]);
}
