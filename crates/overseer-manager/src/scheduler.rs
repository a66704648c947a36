//! Scheduler tick
//!
//! One periodic tick drives the manager: wake timer-due runs, dispatch one
//! scheduled run. Everything else (availability re-dispatch, occupancy
//! timeouts) is event-driven.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::manager::TaskManager;

pub fn spawn_scheduler(
    manager: &Arc<TaskManager>,
    tick: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let manager = Arc::clone(manager);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    manager.scheduler_pass().await;
                }
            }
        }
    })
}
