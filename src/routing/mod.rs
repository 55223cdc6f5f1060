//! Task classification: deterministic routing, inference fallbacks, and
//! workflow decomposition.

pub mod classifier;
pub mod decomposer;
pub mod llm;
pub mod registry;
pub mod router;

use serde::{Deserialize, Serialize};

/// How a worker was chosen for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    /// `assigned_to` named the escalation worker.
    AssignedEscalation,
    /// `type` or `description` contained an escalation keyword.
    EscalationKeyword,
    /// `assigned_to` named an ordinary worker.
    AssignedWorker,
    /// `type` exactly matched a routing key.
    TypeMatch,
    /// A routing key appeared in the description.
    KeywordMatch,
    /// The inference classifier picked the worker.
    Classifier,
    /// The decomposer produced this step.
    Decomposer,
}

impl RouteStrategy {
    /// Provenance label written into mailbox envelopes as `routed_by`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::AssignedEscalation => "router/assigned_escalation",
            Self::EscalationKeyword => "router/escalation_keyword",
            Self::AssignedWorker => "router/assigned",
            Self::TypeMatch => "router/type",
            Self::KeywordMatch => "router/keyword",
            Self::Classifier => "classifier",
            Self::Decomposer => "decomposer",
        }
    }
}

impl std::fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
