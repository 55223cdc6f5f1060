//! Per-task control flow: route, dispatch, or record as unroutable.
//!
//! Strategies run in a fixed order and each one either places the task or
//! hands over to the next:
//!
//! 1. decomposer, when the task asks for a workflow
//! 2. keyword router
//! 3. inference classifier
//! 4. decomposer, for long descriptions
//! 5. an explicit unroutable error record in the primary outbox

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, info_span, warn, Instrument};

use super::dispatcher::{DispatchReceipt, Dispatcher, WorkflowProgress};
use super::mailbox::publish_file;
use super::status_sync::StatusSynchronizer;
use crate::journal::{record_quietly, JournalEntry, JournalEvent, RoutingJournal};
use crate::models::envelope::Provenance;
use crate::models::result::ResultRecord;
use crate::models::task::Task;
use crate::models::worker::WorkerSpec;
use crate::routing::classifier::Classifier;
use crate::routing::decomposer::Decomposer;
use crate::routing::registry::{read_registry, SharedRegistry};
use crate::routing::router::Router;
use crate::routing::RouteStrategy;
use crate::{AppError, Result};

/// Error tag on records for tasks no strategy could place.
pub const UNROUTABLE: &str = "unroutable";
/// Error tag on records for file tasks whose mailbox write failed.
pub const DISPATCH_FAILED: &str = "dispatch_failed";
/// Agent name stamped on records the pipeline writes itself.
pub const ROUTER_AGENT: &str = "router";

/// Where a task entered the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOrigin {
    /// A JSON file in the inbox directory.
    File {
        /// Inbox file name.
        name: String,
    },
    /// A durable record polled from the store.
    Store,
}

impl TaskOrigin {
    /// Logical source name echoed back by workers as `task_source`.
    #[must_use]
    pub fn source_name(&self) -> &str {
        match self {
            Self::File { name } => name,
            Self::Store => "store",
        }
    }

    fn provenance(&self, routed_by: &str) -> Provenance {
        match self {
            Self::File { name } => Provenance::file(routed_by, name),
            Self::Store => Provenance::named(routed_by, "store"),
        }
    }
}

/// What happened to a task.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Delivered to one worker.
    Dispatched {
        /// Strategy that picked the worker.
        strategy: RouteStrategy,
        /// Key or keyword behind a deterministic route.
        matched: Option<String>,
        /// Mailbox receipt.
        receipt: DispatchReceipt,
    },
    /// Decomposed into a workflow.
    Workflow(WorkflowProgress),
    /// Recorded as an error in the primary outbox.
    Unroutable {
        /// Error tag (`unroutable` or `dispatch_failed`).
        code: String,
        /// Human-readable explanation.
        reason: String,
        /// Path of the error record.
        record: PathBuf,
    },
}

/// Runs the routing strategies for one task at a time.
pub struct Pipeline {
    registry: SharedRegistry,
    classifier: Classifier,
    decomposer: Decomposer,
    dispatcher: Dispatcher,
    status: StatusSynchronizer,
    outbox_dir: PathBuf,
    journal: Option<Arc<dyn RoutingJournal>>,
}

impl Pipeline {
    /// Create a pipeline with inference disabled.
    #[must_use]
    pub fn new(
        registry: SharedRegistry,
        dispatcher: Dispatcher,
        status: StatusSynchronizer,
        outbox_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            classifier: Classifier::disabled(),
            decomposer: Decomposer::disabled(),
            dispatcher,
            status,
            outbox_dir,
            journal: None,
        }
    }

    /// Attach the inference classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Attach the workflow decomposer.
    #[must_use]
    pub fn with_decomposer(mut self, decomposer: Decomposer) -> Self {
        self.decomposer = decomposer;
        self
    }

    /// Journal every decision.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn RoutingJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// The dispatcher used for every placement.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Route and dispatch one task.
    ///
    /// # Errors
    ///
    /// Store-backed tasks whose mailbox write fails return the dispatch
    /// error and stay in `inbox` for the next poll. Writing the unroutable
    /// record can also fail with `AppError::Io`.
    pub async fn process(&self, task: Task, origin: &TaskOrigin) -> Result<PipelineOutcome> {
        let span = info_span!(
            "pipeline",
            task_id = task.id.as_deref().unwrap_or("-"),
            source = origin.source_name()
        );
        self.run(task, origin).instrument(span).await
    }

    async fn run(&self, task: Task, origin: &TaskOrigin) -> Result<PipelineOutcome> {
        let (router, roster, min_length) = {
            let registry = read_registry(&self.registry);
            let roster: Vec<WorkerSpec> = registry.enabled().cloned().collect();
            (
                Router::new(registry.routing_table()),
                roster,
                registry.routing().decompose_min_length,
            )
        };

        if task.workflow {
            if let Some(progress) = self.try_workflow(&task, origin, &roster).await {
                return Ok(PipelineOutcome::Workflow(progress));
            }
        }

        if let Some(decision) = router.route(&task) {
            return self
                .dispatch_to(&decision.worker, decision.strategy, decision.matched, task, origin)
                .await;
        }

        if let Some(worker) = self.classifier.classify(&task, &roster).await {
            return self
                .dispatch_to(&worker, RouteStrategy::Classifier, None, task, origin)
                .await;
        }

        let long_enough = task
            .description
            .as_deref()
            .is_some_and(|d| d.trim().chars().count() > min_length);
        if !task.workflow && long_enough {
            if let Some(progress) = self.try_workflow(&task, origin, &roster).await {
                return Ok(PipelineOutcome::Workflow(progress));
            }
        }

        self.unroutable(
            task,
            origin,
            UNROUTABLE,
            "no routing rule, classifier answer, or decomposition matched this task".to_owned(),
        )
        .await
    }

    async fn try_workflow(
        &self,
        task: &Task,
        origin: &TaskOrigin,
        roster: &[WorkerSpec],
    ) -> Option<WorkflowProgress> {
        let subtasks = self.decomposer.decompose(task, roster).await?;
        if subtasks.len() < 2 {
            debug!(steps = subtasks.len(), "decomposition too small for a workflow");
            return None;
        }

        let provenance = origin.provenance(RouteStrategy::Decomposer.label());
        match self
            .dispatcher
            .dispatch_workflow(task, &subtasks, &provenance)
            .await
        {
            Ok(progress) => {
                record_quietly(
                    self.journal.as_deref(),
                    JournalEntry::new(JournalEvent::WorkflowStarted)
                        .with_task(task.id.as_deref())
                        .with_source(origin.source_name())
                        .with_workflow(&progress.workflow.id)
                        .with_detail(format!(
                            "{} steps, {} released",
                            progress.workflow.steps.len(),
                            progress.released.len()
                        )),
                );
                Some(progress)
            }
            Err(err) => {
                warn!(%err, "workflow dispatch failed, trying next strategy");
                None
            }
        }
    }

    async fn dispatch_to(
        &self,
        worker: &str,
        strategy: RouteStrategy,
        matched: Option<String>,
        task: Task,
        origin: &TaskOrigin,
    ) -> Result<PipelineOutcome> {
        let provenance = origin.provenance(strategy.label());
        match self.dispatcher.dispatch(worker, &task, &provenance).await {
            Ok(receipt) => {
                record_quietly(
                    self.journal.as_deref(),
                    JournalEntry::new(JournalEvent::Dispatched)
                        .with_task(task.id.as_deref())
                        .with_source(origin.source_name())
                        .with_worker(worker, strategy.label())
                        .with_matched(matched.as_deref()),
                );
                Ok(PipelineOutcome::Dispatched {
                    strategy,
                    matched,
                    receipt,
                })
            }
            Err(err) if *origin == TaskOrigin::Store => Err(err),
            Err(err) => {
                warn!(%err, worker, "dispatch failed for inbox file");
                self.unroutable(task, origin, DISPATCH_FAILED, err.to_string())
                    .await
            }
        }
    }

    async fn unroutable(
        &self,
        task: Task,
        origin: &TaskOrigin,
        code: &str,
        reason: String,
    ) -> Result<PipelineOutcome> {
        if let Some(id) = task.id.as_deref() {
            match self.status.mark_unroutable(id).await {
                Ok(()) | Err(AppError::NotFound(_)) => {}
                Err(err) => warn!(%err, task_id = id, "failed to mark task as error"),
            }
        }

        let mut extra = Map::new();
        extra.insert("error".into(), Value::String(code.to_owned()));
        extra.insert("explanation".into(), Value::String(reason.clone()));
        extra.insert(
            "original_task".into(),
            serde_json::to_value(&task).unwrap_or(Value::Null),
        );
        let record = ResultRecord {
            agent: ROUTER_AGENT.to_owned(),
            result: json!({ "error": code, "explanation": reason }),
            status: Some("error".to_owned()),
            task_id: task.id.clone(),
            task_source: Some(origin.source_name().to_owned()),
            completed_at: Some(Utc::now().to_rfc3339()),
            extra,
            ..ResultRecord::default()
        };

        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| AppError::Io(format!("failed to encode error record: {e}")))?;
        let file_name = format!(
            "{code}-{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
            uuid::Uuid::new_v4().simple()
        );
        let path = publish_file(self.outbox_dir.clone(), file_name, body).await?;

        info!(
            task_id = task.id.as_deref().unwrap_or("-"),
            source = origin.source_name(),
            code,
            record = %path.display(),
            "task recorded as unroutable"
        );
        record_quietly(
            self.journal.as_deref(),
            JournalEntry::new(JournalEvent::Unroutable)
                .with_task(task.id.as_deref())
                .with_source(origin.source_name())
                .with_detail(format!("{code}: {reason}")),
        );

        Ok(PipelineOutcome::Unroutable {
            code: code.to_owned(),
            reason,
            record: path,
        })
    }
}
