//! Outbox reconciliation.
//!
//! Turns worker result files back into lifecycle updates on the durable
//! record. Every file that is read is archived exactly once, whether or
//! not it could be correlated with a task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::archive::{is_recent, move_into, Collision};
use super::deliverable;
use super::dispatcher::Dispatcher;
use super::notifier::Notification;
use super::status_sync::StatusSynchronizer;
use crate::journal::{record_quietly, JournalEntry, JournalEvent, RoutingJournal};
use crate::models::deliverable::Deliverable;
use crate::models::result::ResultRecord;
use crate::models::task::{TaskStatus, TaskUpdate, UpdateStatus};
use crate::{AppError, Result};

/// Subdirectory of `processed_dir` receiving archived result files.
pub const OUTBOX_ARCHIVE_DIR: &str = "outbox";

/// Files younger than this that fail to parse are left for a later pass.
pub const SETTLE_WINDOW: Duration = Duration::from_secs(2);

/// How a result was tied back to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// The record named the task id.
    TaskId,
    /// The archived inbox file named by `task_source` supplied the id.
    SourceFile,
    /// Nothing matched.
    Unmatched,
}

/// Everything learned while reconciling one file.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// Durable task id, when correlated.
    pub task_id: Option<String>,
    /// Correlation path taken.
    pub correlation: Correlation,
    /// Task status after the update, when a lifecycle write happened.
    pub lifecycle: Option<TaskStatus>,
    /// Detected deliverable.
    pub deliverable: Option<Deliverable>,
    /// A notification was queued.
    pub notified: bool,
    /// Archive location.
    pub archived: PathBuf,
}

/// Result of [`Reconciler::reconcile_file`].
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// The file was already gone.
    Missing,
    /// The file is still being written; nothing was done.
    NotReady,
    /// The file was not a result record and was archived as-is.
    Malformed {
        /// Archive location.
        archived: PathBuf,
    },
    /// The file was processed and archived.
    Reconciled(ReconcileReport),
}

#[derive(Debug, Default)]
struct Origin {
    task_id: Option<String>,
    conversation_id: Option<String>,
    user_id: Option<String>,
}

/// Applies worker results to the store.
pub struct Reconciler {
    status: StatusSynchronizer,
    dispatcher: Dispatcher,
    processed_dir: PathBuf,
    notifier: Option<mpsc::Sender<Notification>>,
    journal: Option<Arc<dyn RoutingJournal>>,
}

impl Reconciler {
    /// Create a reconciler archiving into `<processed_dir>/outbox/`.
    #[must_use]
    pub fn new(status: StatusSynchronizer, dispatcher: Dispatcher, processed_dir: PathBuf) -> Self {
        Self {
            status,
            dispatcher,
            processed_dir,
            notifier: None,
            journal: None,
        }
    }

    /// Forward correlated results with a conversation to `tx`.
    #[must_use]
    pub fn with_notifier(mut self, tx: mpsc::Sender<Notification>) -> Self {
        self.notifier = Some(tx);
        self
    }

    /// Journal every reconciliation.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn RoutingJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Directory archived result files are moved into.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.processed_dir.join(OUTBOX_ARCHIVE_DIR)
    }

    /// Reconcile one result file.
    ///
    /// Correlation and lifecycle failures are logged; the file is still
    /// archived.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` when the file cannot be read or archived.
    pub async fn reconcile_file(&self, path: &Path) -> Result<ReconcileOutcome> {
        let span = info_span!("reconcile", file = %path.display());
        self.reconcile(path).instrument(span).await
    }

    async fn reconcile(&self, path: &Path) -> Result<ReconcileOutcome> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "result already handled");
                return Ok(ReconcileOutcome::Missing);
            }
            Err(e) => {
                return Err(AppError::Io(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let record: ResultRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(err) => {
                if is_recent(path, SETTLE_WINDOW).await {
                    debug!(path = %path.display(), "result still being written");
                    return Ok(ReconcileOutcome::NotReady);
                }
                warn!(path = %path.display(), %err, "malformed result file");
                let archived = move_into(path, &self.archive_dir(), Collision::Suffix).await?;
                return Ok(ReconcileOutcome::Malformed { archived });
            }
        };

        let (origin, correlation) = self.correlate(&record).await;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let deliverable = deliverable::detect(&record, base_dir).await;

        let lifecycle = match origin.task_id.as_deref() {
            Some(task_id) => self.apply(task_id, &record, deliverable.clone()).await,
            None => self.advance_orphan_step(&record).await,
        };

        let notified = self.notify(&record, &origin, deliverable.clone()).await;
        let archived = move_into(path, &self.archive_dir(), Collision::Suffix).await?;

        let event = if correlation == Correlation::Unmatched {
            warn!(path = %path.display(), agent = %record.agent, "result matched no task");
            JournalEvent::Unmatched
        } else {
            info!(
                task_id = origin.task_id.as_deref().unwrap_or("-"),
                agent = %record.agent,
                status = lifecycle.map_or("-", TaskStatus::as_str),
                "result reconciled"
            );
            JournalEvent::Reconciled
        };
        record_quietly(
            self.journal.as_deref(),
            JournalEntry::new(event)
                .with_task(origin.task_id.as_deref())
                .with_worker(&record.agent, "reconciler")
                .with_detail(format!(
                    "{} -> {}",
                    record.status.as_deref().unwrap_or("done"),
                    archived.display()
                )),
        );

        Ok(ReconcileOutcome::Reconciled(ReconcileReport {
            task_id: origin.task_id,
            correlation,
            lifecycle,
            deliverable,
            notified,
            archived,
        }))
    }

    async fn correlate(&self, record: &ResultRecord) -> (Origin, Correlation) {
        let named_id = record.task_id.as_deref().filter(|id| !id.is_empty());
        let source = match record.task_source.as_deref() {
            Some(name) => self.read_source(name).await,
            None => None,
        }
        // A reused inbox name can leave another task's file in the archive.
        .filter(|v| match (named_id, field_string(v, &["id"])) {
            (Some(named), Some(archived)) => named == archived,
            _ => true,
        });

        let mut origin = Origin {
            conversation_id: source.as_ref().and_then(|v| field_string(v, &["conversation_id", "chat_id"])),
            user_id: source.as_ref().and_then(|v| field_string(v, &["user_id"])),
            ..Origin::default()
        };

        let correlation = if let Some(id) = named_id {
            origin.task_id = Some(id.to_owned());
            Correlation::TaskId
        } else if let Some(id) = source.as_ref().and_then(|v| field_string(v, &["id"])) {
            origin.task_id = Some(id);
            Correlation::SourceFile
        } else if source.is_some() {
            Correlation::SourceFile
        } else {
            Correlation::Unmatched
        };

        if origin.conversation_id.is_none() {
            if let Some(id) = origin.task_id.as_deref() {
                if let Ok(Some(task)) = self.status.tasks().find(id).await {
                    origin.conversation_id = task.conversation_id;
                    origin.user_id = origin.user_id.or(task.user_id);
                }
            }
        }

        (origin, correlation)
    }

    async fn read_source(&self, task_source: &str) -> Option<Value> {
        let trimmed = task_source
            .split_once("#step-")
            .map_or(task_source, |(name, _)| name);
        let name = Path::new(trimmed).file_name()?;
        let path = self.processed_dir.join(name);
        let raw = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(path = %path.display(), %err, "archived source is not json");
                None
            }
        }
    }

    async fn apply(
        &self,
        task_id: &str,
        record: &ResultRecord,
        deliverable: Option<Deliverable>,
    ) -> Option<TaskStatus> {
        let update = build_update(record, deliverable);
        let outcome = match (record.workflow_id.as_deref(), record.step_index) {
            (Some(workflow_id), Some(step_index)) => {
                self.apply_step(task_id, workflow_id, step_index, record, &update)
                    .await
            }
            _ => {
                let terminal = if record.is_error() {
                    TaskStatus::Error
                } else {
                    TaskStatus::Done
                };
                self.status
                    .record_result(task_id, &update, terminal)
                    .await
                    .map(Some)
            }
        };

        match outcome {
            Ok(status) => status,
            Err(AppError::NotFound(_)) => {
                warn!(task_id, "result names a task the store does not know");
                None
            }
            Err(err) => {
                warn!(task_id, %err, "lifecycle update failed");
                None
            }
        }
    }

    async fn apply_step(
        &self,
        task_id: &str,
        workflow_id: &str,
        step_index: usize,
        record: &ResultRecord,
        update: &TaskUpdate,
    ) -> Result<Option<TaskStatus>> {
        self.status.append_update(task_id, update).await?;

        let progress = match self
            .dispatcher
            .advance_workflow(workflow_id, step_index, !record.is_error())
            .await
        {
            Ok(progress) => progress,
            Err(err) => {
                warn!(workflow_id, step_index, %err, "workflow advance failed");
                return Ok(None);
            }
        };

        if progress.duplicate || !progress.is_complete() {
            return Ok(None);
        }
        let terminal = if progress.has_failures() {
            TaskStatus::Error
        } else {
            TaskStatus::Done
        };
        info!(workflow_id, task_id, status = %terminal, "workflow complete");
        self.status.finish(task_id, terminal).await.map(Some)
    }

    /// Workflow results whose parent had no durable id still drive the DAG.
    async fn advance_orphan_step(&self, record: &ResultRecord) -> Option<TaskStatus> {
        let (Some(workflow_id), Some(step_index)) = (record.workflow_id.as_deref(), record.step_index)
        else {
            return None;
        };
        if let Err(err) = self
            .dispatcher
            .advance_workflow(workflow_id, step_index, !record.is_error())
            .await
        {
            warn!(workflow_id, step_index, %err, "workflow advance failed");
        }
        None
    }

    async fn notify(
        &self,
        record: &ResultRecord,
        origin: &Origin,
        deliverable: Option<Deliverable>,
    ) -> bool {
        let (Some(tx), Some(conversation_id)) = (&self.notifier, origin.conversation_id.clone())
        else {
            return false;
        };
        let note = Notification {
            conversation_id,
            user_id: origin.user_id.clone(),
            task_id: origin.task_id.clone(),
            agent: record.agent.clone(),
            status: update_status(record),
            summary: deliverable::inline_text(&record.result).map(|t| t.chars().take(200).collect()),
            deliverable,
        };
        match tx.send(note).await {
            Ok(()) => true,
            Err(_) => {
                warn!("notification channel closed");
                false
            }
        }
    }
}

fn update_status(record: &ResultRecord) -> UpdateStatus {
    if record.is_error() {
        UpdateStatus::Error
    } else {
        UpdateStatus::Done
    }
}

fn build_update(record: &ResultRecord, deliverable: Option<Deliverable>) -> TaskUpdate {
    let result = if record.result.is_null() {
        record
            .extra
            .get("error")
            .cloned()
            .unwrap_or(Value::Null)
    } else {
        record.result.clone()
    };
    TaskUpdate {
        agent: if record.agent.is_empty() {
            "unknown".to_owned()
        } else {
            record.agent.clone()
        },
        result,
        status: update_status(record),
        deliverable,
        workflow_id: record.workflow_id.clone(),
        step_index: record.step_index,
        created_at: Utc::now(),
    }
}

fn field_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
