// The tick driver end to end, on real (short) intervals.

use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::store::ExecutionStore;
use crate::scheduler::Scheduler;
use crate::tests::fixtures::single_message_workflow;
use crate::tests::helpers::TestHarness;
use crate::workflows::definition::RetryPolicy;
use crate::workflows::execution::ExecutionStatus;

#[tokio::test]
async fn test_scheduler_drains_work_without_manual_ticks() {
    let config = EngineConfig {
        tick_interval: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let harness = TestHarness::with_config(config);

    let workflow = single_message_workflow(Uuid::new_v4(), Uuid::new_v4(), RetryPolicy::none());
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

    let handle = Scheduler::start(harness.engine.clone());

    // Give the loop a few ticks to pick the execution up.
    let mut completed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let execution = harness.store.get(execution_id).await.unwrap();
        if execution.status == ExecutionStatus::Completed {
            completed = true;
            break;
        }
    }
    handle.shutdown().await;

    assert!(completed, "scheduler never drained the due execution");
    assert_eq!(harness.delivery.unique_sends().await, 1);
}
