//! Durable store polling.
//!
//! Picks up `inbox` tasks every `poll_interval_seconds`, or sooner when the
//! webhook signals a new record. One loop processes tasks serially, so a
//! task is never dispatched twice by concurrent passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::task::TaskStatus;
use crate::orchestrator::pipeline::{Pipeline, TaskOrigin};
use crate::persistence::task_repo::TaskRepo;
use crate::Result;

/// Tasks fetched per pass.
pub const POLL_BATCH: u32 = 50;

/// Run one polling pass and return the number of tasks handled.
///
/// A task whose pipeline run fails stays in `inbox` and is retried on the
/// next pass.
///
/// # Errors
///
/// Returns `AppError::Db` if the store cannot be queried.
pub async fn poll_once(tasks: &TaskRepo, pipeline: &Pipeline) -> Result<usize> {
    let pending = tasks.list_by_status(TaskStatus::Inbox, POLL_BATCH).await?;
    if pending.is_empty() {
        return Ok(0);
    }
    debug!(count = pending.len(), "store tasks awaiting routing");

    let mut handled = 0;
    for task in pending {
        let task_id = task.id.clone().unwrap_or_default();
        match pipeline.process(task, &TaskOrigin::Store).await {
            Ok(_) => handled += 1,
            Err(err) => warn!(%err, task_id, "store task left in inbox"),
        }
    }
    Ok(handled)
}

/// Spawn the store polling loop.
#[must_use]
pub fn spawn_store_poller(
    tasks: TaskRepo,
    pipeline: Arc<Pipeline>,
    interval: Duration,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("store poller shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                () = wake.notified() => {
                    debug!("store poller woken");
                }
            }
            if let Err(err) = poll_once(&tasks, &pipeline).await {
                warn!(%err, "store poll failed");
            }
        }
    })
}
