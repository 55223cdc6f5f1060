//! Inbox file handling.
//!
//! Each task file is parsed, run through the pipeline, and moved to
//! `<processed_dir>/<name>`, where the reconciler later finds it through
//! a result's `task_source`. Files that are not tasks go to
//! `<processed_dir>/rejected/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::models::task::Task;
use crate::orchestrator::archive::{is_recent, move_into, Collision};
use crate::orchestrator::pipeline::{Pipeline, PipelineOutcome, TaskOrigin};
use crate::orchestrator::reconciler::SETTLE_WINDOW;
use crate::{AppError, Result};

/// Subdirectory of `processed_dir` for files that are not tasks.
pub const REJECTED_DIR: &str = "rejected";

/// What happened to one inbox file.
#[derive(Debug, Clone)]
pub enum InboxOutcome {
    /// The file was already gone.
    Missing,
    /// The file is still being written.
    NotReady,
    /// Not a task; archived under `rejected/`.
    Rejected {
        /// Archive location.
        archived: PathBuf,
    },
    /// Routed (or recorded as unroutable) and archived.
    Processed {
        /// Pipeline result.
        outcome: Box<PipelineOutcome>,
        /// Archive location.
        archived: PathBuf,
    },
}

/// Handles task files dropped into the inbox directory.
pub struct InboxProcessor {
    pipeline: Arc<Pipeline>,
    processed_dir: PathBuf,
}

impl InboxProcessor {
    /// Create a processor archiving into `processed_dir`.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, processed_dir: PathBuf) -> Self {
        Self {
            pipeline,
            processed_dir,
        }
    }

    /// Process one inbox file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read or archived. A
    /// pipeline failure leaves the file in place for the next scan.
    pub async fn handle(&self, path: &Path) -> Result<InboxOutcome> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(InboxOutcome::Missing),
            Err(e) => {
                return Err(AppError::Io(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Io(format!("no file name in {}", path.display())))?;

        let task = match serde_json::from_slice::<Task>(&raw) {
            Ok(task) if task.is_well_formed() => task,
            Ok(_) => return self.reject(path, "task has neither type nor description").await,
            Err(err) => {
                if is_recent(path, SETTLE_WINDOW).await {
                    debug!(file = %name, "task file still being written");
                    return Ok(InboxOutcome::NotReady);
                }
                return self.reject(path, &err.to_string()).await;
            }
        };

        let outcome = self
            .pipeline
            .process(task, &TaskOrigin::File { name: name.clone() })
            .await?;
        let archived = move_into(path, &self.processed_dir, Collision::Replace).await?;
        debug!(file = %name, archived = %archived.display(), "inbox file archived");

        Ok(InboxOutcome::Processed {
            outcome: Box::new(outcome),
            archived,
        })
    }

    async fn reject(&self, path: &Path, reason: &str) -> Result<InboxOutcome> {
        warn!(file = %path.display(), reason, "rejecting inbox file");
        let archived = move_into(path, &self.processed_dir.join(REJECTED_DIR), Collision::Suffix).await?;
        info!(archived = %archived.display(), "inbox file rejected");
        Ok(InboxOutcome::Rejected { archived })
    }
}
