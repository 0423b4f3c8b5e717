// Scheduler - the single periodic driver draining due executions.
//
// The schedule itself is stateless: the store's due index is the source of
// truth, so a restarted process picks up exactly where the last one stopped.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::workflows::engine::WorkflowEngine;

pub struct Scheduler;

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the tick loop. Every tick drains all currently-due work through
    /// the engine's bounded worker pool.
    pub fn start(engine: Arc<WorkflowEngine>) -> SchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let tick_interval = engine.config().tick_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = tick_interval.as_secs(), "scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.process_due(Utc::now()).await {
                            Ok(0) => debug!("tick: nothing due"),
                            Ok(n) => info!(processed = n, "tick: drained due executions"),
                            Err(e) => error!("tick failed: {e}"),
                        }
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            info!("scheduler stopping");
                            break;
                        }
                    }
                }
            }
        });

        SchedulerHandle { shutdown, task }
    }
}

impl SchedulerHandle {
    /// Stop the tick loop and wait for the in-flight tick to finish. Parked
    /// and claimed work stays in the store; nothing is lost.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
