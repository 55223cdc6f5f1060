//! Append-only routing journal.
//!
//! Every routing decision and reconciliation is recorded as one JSON line.
//! The primary implementation, [`writer::JsonlJournalWriter`], appends to
//! daily-rotating files under `<data_dir>/journal/`.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a task at this point in its life.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    /// Task written to a worker's mailbox.
    Dispatched,
    /// Task decomposed into a workflow.
    WorkflowStarted,
    /// No strategy produced a worker.
    Unroutable,
    /// A worker result was matched and applied.
    Reconciled,
    /// A worker result matched nothing in the store.
    Unmatched,
}

/// A structured record of one routing or reconciliation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event: JournalEvent,
    /// Durable task id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Source filename or logical source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Worker involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Strategy label (`router/type`, `classifier`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Keyword or type value that triggered a deterministic route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    /// Workflow id for decomposed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Free-form detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JournalEntry {
    /// Construct a minimal entry for the given event.
    #[must_use]
    pub fn new(event: JournalEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            task_id: None,
            source_name: None,
            worker: None,
            strategy: None,
            matched: None,
            workflow_id: None,
            detail: None,
        }
    }

    /// Set the task id.
    #[must_use]
    pub fn with_task(mut self, task_id: Option<&str>) -> Self {
        self.task_id = task_id.map(str::to_owned);
        self
    }

    /// Set the source name.
    #[must_use]
    pub fn with_source(mut self, source_name: &str) -> Self {
        self.source_name = Some(source_name.to_owned());
        self
    }

    /// Set the worker and the strategy that picked it.
    #[must_use]
    pub fn with_worker(mut self, worker: &str, strategy: &str) -> Self {
        self.worker = Some(worker.to_owned());
        self.strategy = Some(strategy.to_owned());
        self
    }

    /// Set the matched keyword or type.
    #[must_use]
    pub fn with_matched(mut self, matched: Option<&str>) -> Self {
        self.matched = matched.map(str::to_owned);
        self
    }

    /// Set the workflow id.
    #[must_use]
    pub fn with_workflow(mut self, workflow_id: &str) -> Self {
        self.workflow_id = Some(workflow_id.to_owned());
        self
    }

    /// Set free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sink for journal entries.
pub trait RoutingJournal: Send + Sync {
    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized or written.
    fn record(&self, entry: JournalEntry) -> crate::Result<()>;
}

/// Record an entry, logging rather than propagating failures.
pub fn record_quietly(journal: Option<&dyn RoutingJournal>, entry: JournalEntry) {
    if let Some(journal) = journal {
        if let Err(err) = journal.record(entry) {
            tracing::warn!(%err, "failed to write routing journal entry");
        }
    }
}
