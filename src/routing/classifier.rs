//! Inference fallback for tasks the router cannot place.
//!
//! Best effort: one attempt, a hard timeout, and an output constrained to
//! the roster's worker names. Anything else is "no classification".

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::models::task::Task;
use crate::models::worker::WorkerSpec;

use super::llm::{CompletionProvider, CompletionRequest};

const NO_MATCH: &str = "none";

/// Single-shot worker classifier.
#[derive(Clone)]
pub struct Classifier {
    provider: Option<Arc<dyn CompletionProvider>>,
    timeout: Duration,
}

impl Classifier {
    /// Build a classifier; `None` disables it.
    #[must_use]
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// A classifier that never answers.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(0))
    }

    /// Whether an inference provider is attached.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Ask inference which enabled worker should take the task.
    ///
    /// Returns `None` on timeout, call failure, or any answer outside the
    /// roster.
    pub async fn classify(&self, task: &Task, roster: &[WorkerSpec]) -> Option<String> {
        let provider = self.provider.as_ref()?;
        let vocabulary: Vec<&str> = roster
            .iter()
            .filter(|w| w.enabled)
            .map(|w| w.name.as_str())
            .collect();
        if vocabulary.is_empty() {
            return None;
        }

        let request = CompletionRequest {
            system: classification_prompt(roster),
            user: serde_json::to_string(task).unwrap_or_default(),
            max_tokens: 16,
        };

        let raw = match tokio::time::timeout(self.timeout, provider.complete(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!(%err, "classification call failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "classification call timed out");
                return None;
            }
        };

        let label = normalize_label(&raw);
        if label == NO_MATCH {
            debug!("classifier declined to pick a worker");
            return None;
        }

        if vocabulary.contains(&label.as_str()) {
            info!(worker = %label, "classifier picked worker");
            Some(label)
        } else {
            warn!(answer = %raw.trim(), "classifier answered outside the roster, ignoring");
            None
        }
    }
}

fn classification_prompt(roster: &[WorkerSpec]) -> String {
    let mut prompt = String::from(
        "You route tasks to exactly one worker. Reply with only the worker name, \
         or `none` if no worker fits. Workers:\n",
    );
    for worker in roster.iter().filter(|w| w.enabled) {
        prompt.push_str("- ");
        prompt.push_str(&worker.name);
        if let Some(description) = &worker.description {
            prompt.push_str(": ");
            prompt.push_str(description);
        }
        if !worker.keywords.is_empty() {
            prompt.push_str(" (handles: ");
            prompt.push_str(&worker.keywords.join(", "));
            prompt.push(')');
        }
        prompt.push('\n');
    }
    prompt
}

/// Reduce a raw model answer to a bare lower-case label.
#[must_use]
pub fn normalize_label(raw: &str) -> String {
    raw.trim()
        .lines()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
        .to_lowercase()
}
