//! Worker result records read from outbox directories.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A worker's output, consumed exactly once by the reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    /// Worker identity.
    #[serde(default)]
    pub agent: String,
    /// Free-form result payload.
    #[serde(default)]
    pub result: Value,
    /// `error` marks a failed or unroutable outcome; anything else is success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Direct reference to the originating task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Filename of the inbox file that triggered the work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_source: Option<String>,
    /// Artifact path produced by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Alternate artifact path field used by some workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Workflow the result belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Step index within the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// Completion timestamp as reported by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Every other field of the record.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultRecord {
    /// Whether the worker reported failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("error"))
    }

    /// The artifact path, preferring a non-blank `output_file`.
    #[must_use]
    pub fn artifact_path(&self) -> Option<&str> {
        let present = |p: &&str| !p.trim().is_empty();
        self.output_file
            .as_deref()
            .filter(present)
            .or_else(|| self.file_path.as_deref().filter(present))
    }
}
