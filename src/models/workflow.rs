//! Workflow decomposition types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::Provenance;
use super::task::Task;

/// Maximum number of sibling subtasks in one decomposition.
pub const MAX_SUBTASKS: usize = 5;

/// One step produced by the decomposer, before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowSubtask {
    /// Worker that should execute this step.
    pub agent: String,
    /// Step-specific instruction.
    pub description: String,
    /// Index of an earlier sibling this step waits for.
    #[serde(default)]
    pub depends_on: Option<usize>,
    /// Parent task's durable id, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Source filename or name of the parent task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

/// Execution status of a persisted workflow step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for its dependency.
    Pending,
    /// Written to the worker's mailbox.
    Dispatched,
    /// Worker result reconciled as success.
    Done,
    /// Worker result reconciled as failure.
    Error,
    /// Never dispatched because its dependency failed.
    Skipped,
}

impl StepStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Done => "done",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "dispatched" => Some(Self::Dispatched),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Whether the step will not change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Skipped)
    }
}

/// A persisted workflow step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowStep {
    /// 0-based position among its siblings.
    pub index: usize,
    /// Worker executing the step.
    pub agent: String,
    /// Step instruction.
    pub description: String,
    /// Predecessor step index.
    pub depends_on: Option<usize>,
    /// Current execution status.
    pub status: StepStatus,
}

/// A decomposed task tracked as a dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Unique workflow identifier.
    pub id: String,
    /// Parent task's durable id.
    pub parent_task_id: Option<String>,
    /// Source filename or name of the parent task.
    pub source_name: Option<String>,
    /// Inbox filename of the parent task, when it came from a file.
    pub source_file: Option<String>,
    /// The parent task as it was when decomposed.
    pub parent: Task,
    /// Steps in decomposition order.
    pub steps: Vec<WorkflowStep>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Build a workflow with every step pending.
    #[must_use]
    pub fn from_subtasks(parent: &Task, provenance: &Provenance, subtasks: &[WorkflowSubtask]) -> Self {
        let steps = subtasks
            .iter()
            .enumerate()
            .map(|(index, sub)| WorkflowStep {
                index,
                agent: sub.agent.clone(),
                description: sub.description.clone(),
                depends_on: sub.depends_on,
                status: StepStatus::Pending,
            })
            .collect();

        let mut parent = parent.clone();
        parent.updates.clear();

        Self {
            id: Uuid::new_v4().to_string(),
            parent_task_id: parent.id.clone(),
            source_name: Some(provenance.source_name.clone()),
            source_file: provenance.source_file.clone(),
            parent,
            steps,
            created_at: Utc::now(),
        }
    }

    /// Pending steps whose dependency is absent or done.
    #[must_use]
    pub fn ready_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .filter(|step| {
                step.depends_on.is_none_or(|dep| {
                    self.steps
                        .get(dep)
                        .is_some_and(|d| d.status == StepStatus::Done)
                })
            })
            .map(|step| step.index)
            .collect()
    }

    /// Mark pending steps whose dependency failed as skipped.
    ///
    /// Dependencies always point at earlier steps, so one pass in index
    /// order reaches a fixed point. Returns the newly skipped indexes.
    pub fn cascade_skips(&mut self) -> Vec<usize> {
        let mut skipped = Vec::new();
        for index in 0..self.steps.len() {
            let blocked = self.steps[index].status == StepStatus::Pending
                && self.steps[index].depends_on.is_some_and(|dep| {
                    self.steps
                        .get(dep)
                        .is_some_and(|d| matches!(d.status, StepStatus::Error | StepStatus::Skipped))
                });
            if blocked {
                self.steps[index].status = StepStatus::Skipped;
                skipped.push(index);
            }
        }
        skipped
    }

    /// The task handed to a step's worker: the parent with the step's
    /// instruction and worker override.
    #[must_use]
    pub fn step_task(&self, index: usize) -> Option<Task> {
        let step = self.steps.get(index)?;
        let mut task = self.parent.clone();
        if let Some(original) = task.description.take() {
            task.extra
                .insert("parent_description".into(), serde_json::Value::String(original));
        }
        task.description = Some(step.description.clone());
        task.assigned_to = Some(step.agent.clone());
        task.workflow = false;
        Some(task)
    }

    /// Whether every step has reached a terminal status.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Whether any step failed or was skipped.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.status, StepStatus::Error | StepStatus::Skipped))
    }
}
