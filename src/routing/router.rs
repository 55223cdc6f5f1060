//! Keyword router.
//!
//! A pure function over an injected [`RoutingTable`] and the task fields.
//! Precedence, highest first:
//!
//! 1. `assigned_to` names the escalation worker.
//! 2. `type` equals, or the description contains, an escalation keyword.
//! 3. `assigned_to` names an ordinary worker.
//! 4. `type` equals a routing key.
//! 5. The description contains a routing key (declaration order, first wins).
//!
//! A `None` result is not an error; callers fall back to the classifier
//! and the decomposer.

use serde::{Deserialize, Serialize};

use crate::models::task::Task;

use super::RouteStrategy;

/// Routing keys and the escalation rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    /// Worker reserved for escalation; empty disables escalation.
    pub escalation_worker: String,
    /// Lower-cased escalation keywords.
    pub escalation_keywords: Vec<String>,
    /// `(key, worker)` pairs in declaration order.
    pub routes: Vec<(String, String)>,
    /// Every routable ordinary worker, for `assigned_to` overrides.
    pub workers: Vec<String>,
}

impl RoutingTable {
    /// Start a table with an escalation rule and no ordinary routes.
    #[must_use]
    pub fn new(escalation_worker: &str, escalation_keywords: &[&str]) -> Self {
        Self {
            escalation_worker: escalation_worker.to_lowercase(),
            escalation_keywords: escalation_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            routes: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// Append an ordinary route; the worker becomes assignable too.
    #[must_use]
    pub fn with_route(mut self, key: &str, worker: &str) -> Self {
        let worker = worker.to_lowercase();
        if !self.workers.contains(&worker) {
            self.workers.push(worker.clone());
        }
        self.routes.push((key.to_lowercase(), worker));
        self
    }
}

/// The router's answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteDecision {
    /// Chosen worker.
    pub worker: String,
    /// Rule that matched.
    pub strategy: RouteStrategy,
    /// Key or keyword that matched, when applicable.
    pub matched: Option<String>,
}

/// Deterministic task router.
#[derive(Debug, Clone)]
pub struct Router {
    table: RoutingTable,
}

impl Router {
    /// Build a router over the given table.
    #[must_use]
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    /// The table this router was built with.
    #[must_use]
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Route a task to exactly one worker, or `None`.
    #[must_use]
    pub fn route(&self, task: &Task) -> Option<RouteDecision> {
        let assigned = task.assigned_lower();
        let task_type = task.type_lower();
        let description = task.description_lower();

        if let Some(decision) = self.route_escalation(assigned.as_deref(), task_type.as_deref(), &description) {
            return Some(decision);
        }

        if let Some(worker) = assigned.filter(|a| self.table.workers.contains(a)) {
            return Some(RouteDecision {
                worker,
                strategy: RouteStrategy::AssignedWorker,
                matched: None,
            });
        }

        if let Some(task_type) = task_type.as_deref() {
            if let Some((key, worker)) = self.table.routes.iter().find(|(key, _)| key == task_type) {
                return Some(RouteDecision {
                    worker: worker.clone(),
                    strategy: RouteStrategy::TypeMatch,
                    matched: Some(key.clone()),
                });
            }
        }

        if description.is_empty() {
            return None;
        }

        self.table
            .routes
            .iter()
            .find(|(key, _)| description.contains(key.as_str()))
            .map(|(key, worker)| RouteDecision {
                worker: worker.clone(),
                strategy: RouteStrategy::KeywordMatch,
                matched: Some(key.clone()),
            })
    }

    fn route_escalation(
        &self,
        assigned: Option<&str>,
        task_type: Option<&str>,
        description: &str,
    ) -> Option<RouteDecision> {
        let escalation = self.table.escalation_worker.as_str();
        if escalation.is_empty() {
            return None;
        }

        if assigned == Some(escalation) {
            return Some(RouteDecision {
                worker: escalation.to_owned(),
                strategy: RouteStrategy::AssignedEscalation,
                matched: None,
            });
        }

        let keywords = &self.table.escalation_keywords;
        let matched = task_type
            .and_then(|t| keywords.iter().find(|k| k.as_str() == t))
            .or_else(|| {
                keywords
                    .iter()
                    .find(|k| !description.is_empty() && description.contains(k.as_str()))
            })?;

        Some(RouteDecision {
            worker: escalation.to_owned(),
            strategy: RouteStrategy::EscalationKeyword,
            matched: Some(matched.clone()),
        })
    }
}
