//! Mailbox envelope: the enriched task handed to a worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::Task;

/// Routing provenance stamped onto every dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    /// Strategy that chose the worker (e.g. `router/type`, `classifier`).
    pub routed_by: String,
    /// Inbox filename, for file-originated tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Logical source name (filename, `store`, `webhook`, `api`).
    pub source_name: String,
}

impl Provenance {
    /// Provenance for a task dropped into the inbox directory.
    #[must_use]
    pub fn file(routed_by: impl Into<String>, file_name: &str) -> Self {
        Self {
            routed_by: routed_by.into(),
            source_file: Some(file_name.to_owned()),
            source_name: file_name.to_owned(),
        }
    }

    /// Provenance for a task with no file behind it.
    #[must_use]
    pub fn named(routed_by: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            routed_by: routed_by.into(),
            source_file: None,
            source_name: source_name.into(),
        }
    }
}

/// Workflow placement of a dispatched step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRef {
    /// Owning workflow.
    pub workflow_id: String,
    /// Step position.
    pub step_index: usize,
    /// Predecessor step, recorded for the worker's information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<usize>,
    /// Parent task's durable id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

/// Exactly what lands in a worker's queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MailboxEnvelope {
    /// Unique dispatch identifier; also the queue file stem suffix.
    pub dispatch_id: String,
    /// The task, flattened so workers see the original fields at top level.
    #[serde(flatten)]
    pub task: Task,
    /// Routing strategy.
    pub routed_by: String,
    /// Dispatch time.
    pub routed_at: DateTime<Utc>,
    /// Inbox filename, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Logical source; workers echo it back as `task_source`.
    pub source_name: String,
    /// Owning workflow, for decomposed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Step position within the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// Predecessor step, recorded for the worker's information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<usize>,
    /// Parent task's durable id, for decomposed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

impl MailboxEnvelope {
    /// Wrap a task for dispatch, stamping provenance and an optional step.
    #[must_use]
    pub fn new(task: Task, provenance: &Provenance, step: Option<&StepRef>) -> Self {
        Self {
            dispatch_id: uuid::Uuid::new_v4().to_string(),
            task,
            routed_by: provenance.routed_by.clone(),
            routed_at: Utc::now(),
            source_file: provenance.source_file.clone(),
            source_name: provenance.source_name.clone(),
            workflow_id: step.map(|s| s.workflow_id.clone()),
            step_index: step.map(|s| s.step_index),
            depends_on: step.and_then(|s| s.depends_on),
            parent_task_id: step.and_then(|s| s.parent_task_id.clone()),
        }
    }
}
