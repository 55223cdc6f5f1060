//! Task model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::deliverable::Deliverable;

/// Lifecycle status for a task.
///
/// `inbox` is the only initial state; `done` and `error` are terminal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by a producer, waiting to be routed.
    #[default]
    Inbox,
    /// Handed to at least one worker.
    InProgress,
    /// A worker result was reconciled.
    Done,
    /// Unroutable, or a worker reported failure.
    Error,
}

impl TaskStatus {
    /// Storage and wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "inbox" => Some(Self::Inbox),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether no further automatic transition occurs from this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Moving to the current state is allowed and treated as a no-op by
    /// callers. Any state may be reset to `inbox`, which starts a fresh cycle.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == next
            || matches!(
                (self, next),
                (_, Self::Inbox)
                    | (Self::Inbox, Self::InProgress | Self::Error)
                    | (Self::InProgress, Self::Done | Self::Error)
            )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded on an update entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// The worker completed the work.
    Done,
    /// The worker, or the router, reported failure.
    Error,
}

/// Append-only result entry attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskUpdate {
    /// Worker that produced the result.
    pub agent: String,
    /// Free-form result payload, forwarded verbatim.
    pub result: Value,
    /// Success or failure of this entry.
    pub status: UpdateStatus,
    /// Attached artifact metadata, if one was detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable: Option<Deliverable>,
    /// Workflow this entry belongs to, for decomposed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Step index within the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// The unit of work.
///
/// Unknown fields are preserved in `extra` so the original payload can be
/// forwarded and archived verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Durable store identifier; absent for purely file-originated tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-text category hint (e.g. `document`, `epicor`).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Natural-language request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Explicit worker override, case-insensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Advisory priority; accepted as a string or a number.
    #[serde(
        default,
        deserialize_with = "deserialize_priority",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<String>,
    /// Opaque owner reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Chat conversation the task came from, for onward delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Explicit request to decompose into a multi-step workflow.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub workflow: bool,
    /// Opaque structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Opaque structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Ordered result entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<TaskUpdate>,
    /// Every other field of the original object.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Construct an `inbox` task from a type hint and description.
    #[must_use]
    pub fn new(task_type: Option<&str>, description: &str) -> Self {
        Self {
            task_type: task_type.map(str::to_owned),
            description: Some(description.to_owned()),
            ..Self::default()
        }
    }

    /// Lower-cased description, empty when absent.
    #[must_use]
    pub fn description_lower(&self) -> String {
        self.description
            .as_deref()
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Lower-cased, trimmed type hint.
    #[must_use]
    pub fn type_lower(&self) -> Option<String> {
        self.task_type
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }

    /// Lower-cased, trimmed explicit worker override.
    #[must_use]
    pub fn assigned_lower(&self) -> Option<String> {
        self.assigned_to
            .as_deref()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
    }

    /// Whether the task carries at least a type or a description.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.type_lower().is_some()
            || self
                .description
                .as_deref()
                .is_some_and(|d| !d.trim().is_empty())
    }
}

fn deserialize_priority<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
