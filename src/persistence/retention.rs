//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting terminal tasks (updates first), then
//! orphaned workflows, then archived inbox and outbox files older than
//! `retention_days`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::db::Database;
use super::task_repo::TaskRepo;
use super::workflow_repo::WorkflowRepo;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    processed_dir: PathBuf,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, &processed_dir, retention_days).await {
                        error!(?err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Run one purge pass.
///
/// # Errors
///
/// Returns `AppError::Db` if a delete statement fails. File removal errors
/// are logged and skipped.
pub async fn purge(db: &Arc<Database>, processed_dir: &Path, retention_days: u32) -> Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

    let tasks = TaskRepo::new(Arc::clone(db)).purge_terminal(cutoff).await?;
    let workflows = WorkflowRepo::new(Arc::clone(db))
        .purge_orphaned(cutoff)
        .await?;

    let horizon = SystemTime::now()
        .checked_sub(Duration::from_secs(u64::from(retention_days) * 86_400))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut files = 0usize;
    for dir in [
        processed_dir.to_path_buf(),
        processed_dir.join("outbox"),
        processed_dir.join("rejected"),
    ] {
        files += purge_files_older_than(&dir, horizon).await;
    }

    info!(retention_days, tasks, workflows, files, "retention purge completed");
    Ok(())
}

async fn purge_files_older_than(dir: &Path, horizon: SystemTime) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let old = meta.modified().is_ok_and(|modified| modified < horizon);
        if old {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %entry.path().display(), %err, "failed to purge archived file"),
            }
        }
    }
    removed
}
