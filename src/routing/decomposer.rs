//! Splits a complex request into an ordered list of worker subtasks.
//!
//! The model must answer with a JSON array of
//! `{"agent": ..., "description": ..., "depends_on": <earlier index | null>}`.
//! Anything that is not a well-formed array of 1 to 5 entries naming known
//! workers discards the whole attempt.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::task::Task;
use crate::models::worker::WorkerSpec;
use crate::models::workflow::{WorkflowSubtask, MAX_SUBTASKS};
use crate::{AppError, Result};

use super::llm::{CompletionProvider, CompletionRequest};

static FENCED_ARRAY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").ok());

#[derive(Debug, Deserialize)]
struct RawSubtask {
    agent: String,
    description: String,
    #[serde(default)]
    depends_on: Option<usize>,
}

/// Inference-backed workflow decomposer.
#[derive(Clone)]
pub struct Decomposer {
    provider: Option<Arc<dyn CompletionProvider>>,
    timeout: Duration,
}

impl Decomposer {
    /// Build a decomposer; `None` disables it.
    #[must_use]
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// A decomposer that never answers.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(0))
    }

    /// Decompose a task into 1 to 5 subtasks, or `None` on any failure.
    ///
    /// Each subtask carries the parent task's id. Callers treat a single
    /// subtask as "no workflow".
    pub async fn decompose(&self, task: &Task, roster: &[WorkerSpec]) -> Option<Vec<WorkflowSubtask>> {
        let provider = self.provider.as_ref()?;
        let known: Vec<String> = roster
            .iter()
            .filter(|w| w.enabled)
            .map(|w| w.name.clone())
            .collect();
        if known.is_empty() {
            return None;
        }

        let request = CompletionRequest {
            system: decomposition_prompt(roster),
            user: serde_json::to_string(task).unwrap_or_default(),
            max_tokens: 1024,
        };

        let raw = match tokio::time::timeout(self.timeout, provider.complete(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!(%err, "decomposition call failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "decomposition call timed out");
                return None;
            }
        };

        match parse_subtasks(&raw, &known) {
            Ok(mut subtasks) => {
                for sub in &mut subtasks {
                    sub.parent_task_id.clone_from(&task.id);
                }
                info!(steps = subtasks.len(), "task decomposed");
                Some(subtasks)
            }
            Err(err) => {
                warn!(%err, "discarding decomposition");
                None
            }
        }
    }
}

fn decomposition_prompt(roster: &[WorkerSpec]) -> String {
    let names: Vec<&str> = roster
        .iter()
        .filter(|w| w.enabled)
        .map(|w| w.name.as_str())
        .collect();
    format!(
        "Split the task into at most {MAX_SUBTASKS} ordered steps, each handled by one of \
         these workers: {}. Reply with only a JSON array of objects with keys `agent`, \
         `description`, and `depends_on` (the 0-based index of an earlier step, or null).",
        names.join(", ")
    )
}

/// Parse and validate a decomposer answer.
///
/// Accepts a bare array or one inside a fenced code block.
///
/// # Errors
///
/// Returns `AppError::Decomposition` if no array is found, it is empty or
/// longer than [`MAX_SUBTASKS`], an entry names an unknown worker or has an
/// empty description, or `depends_on` does not point at an earlier sibling.
pub fn parse_subtasks(raw: &str, known_workers: &[String]) -> Result<Vec<WorkflowSubtask>> {
    let json = extract_array(raw)
        .ok_or_else(|| AppError::Decomposition("answer contains no JSON array".into()))?;

    let entries: Vec<RawSubtask> = serde_json::from_str(json)
        .map_err(|err| AppError::Decomposition(format!("malformed subtask array: {err}")))?;

    if entries.is_empty() {
        return Err(AppError::Decomposition("subtask array is empty".into()));
    }
    if entries.len() > MAX_SUBTASKS {
        return Err(AppError::Decomposition(format!(
            "{} subtasks exceeds the limit of {MAX_SUBTASKS}",
            entries.len()
        )));
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let agent = entry.agent.trim().to_lowercase();
            if !known_workers.contains(&agent) {
                return Err(AppError::Decomposition(format!(
                    "step {index} names unknown worker {agent:?}"
                )));
            }
            if entry.description.trim().is_empty() {
                return Err(AppError::Decomposition(format!(
                    "step {index} has an empty description"
                )));
            }
            if entry.depends_on.is_some_and(|dep| dep >= index) {
                return Err(AppError::Decomposition(format!(
                    "step {index} depends on a step that does not precede it"
                )));
            }
            Ok(WorkflowSubtask {
                agent,
                description: entry.description.trim().to_owned(),
                depends_on: entry.depends_on,
                parent_task_id: None,
                source_name: None,
            })
        })
        .collect()
}

fn extract_array(raw: &str) -> Option<&str> {
    if let Some(captures) = FENCED_ARRAY.as_ref().and_then(|re| re.captures(raw)) {
        return captures.get(1).map(|m| m.as_str());
    }
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}
