//! Mailbox dispatch for single tasks and workflow steps.
//!
//! The mailbox write always happens before the status write. A dispatch
//! whose status write fails is still a dispatch: the envelope is in the
//! queue and the receipt reports `status_synced: false`.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::mailbox::Mailbox;
use super::status_sync::StatusSynchronizer;
use crate::models::envelope::{MailboxEnvelope, Provenance, StepRef};
use crate::models::task::{Task, TaskStatus};
use crate::models::workflow::{StepStatus, Workflow, WorkflowSubtask};
use crate::persistence::workflow_repo::WorkflowRepo;
use crate::routing::registry::{read_registry, SharedRegistry};
use crate::routing::RouteStrategy;
use crate::{AppError, Result};

/// Outcome of one mailbox write.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// Worker whose queue received the envelope.
    pub worker: String,
    /// Envelope identifier.
    pub dispatch_id: String,
    /// Queue file path.
    pub path: PathBuf,
    /// Step position, for workflow dispatches.
    pub step_index: Option<usize>,
    /// Whether the durable store now shows the task `in_progress`.
    /// `false` when there is no durable record or the write failed.
    pub status_synced: bool,
}

/// State of a workflow after a launch or an advance.
#[derive(Debug, Clone)]
pub struct WorkflowProgress {
    /// Workflow as persisted after this call.
    pub workflow: Workflow,
    /// Steps whose envelopes were written during this call.
    pub released: Vec<DispatchReceipt>,
    /// Steps skipped during this call because a predecessor failed.
    pub skipped: Vec<usize>,
    /// The reported step had already reached a terminal status.
    pub duplicate: bool,
}

impl WorkflowProgress {
    /// Every step is done, errored, or skipped.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.workflow.is_complete()
    }

    /// At least one step errored or was skipped.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.workflow.has_failures()
    }
}

/// Writes tasks into worker mailboxes and keeps the store in step.
#[derive(Clone)]
pub struct Dispatcher {
    mailbox: Mailbox,
    status: StatusSynchronizer,
    workflows: WorkflowRepo,
    registry: SharedRegistry,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        mailbox: Mailbox,
        status: StatusSynchronizer,
        workflows: WorkflowRepo,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            mailbox,
            status,
            workflows,
            registry,
        }
    }

    /// Mailbox this dispatcher writes to.
    #[must_use]
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Workflow repository.
    #[must_use]
    pub fn workflows(&self) -> &WorkflowRepo {
        &self.workflows
    }

    /// Deliver `task` to `worker` and move its durable record to
    /// `in_progress`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dispatch` if the worker is unknown, disabled, or
    /// at its pending ceiling, or if the mailbox write fails.
    pub async fn dispatch(
        &self,
        worker: &str,
        task: &Task,
        provenance: &Provenance,
    ) -> Result<DispatchReceipt> {
        let (dispatch_id, path) = self.deliver(worker, task.clone(), provenance, None).await?;
        let status_synced = self.sync_in_progress(task.id.as_deref()).await;
        info!(
            worker,
            task_id = task.id.as_deref().unwrap_or("-"),
            routed_by = %provenance.routed_by,
            source = %provenance.source_name,
            "task dispatched"
        );
        Ok(DispatchReceipt {
            worker: worker.to_owned(),
            dispatch_id,
            path,
            step_index: None,
            status_synced,
        })
    }

    /// Persist a workflow for `task` and dispatch its root steps.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Decomposition` for an empty step list, or a store
    /// error if the workflow cannot be persisted.
    pub async fn dispatch_workflow(
        &self,
        task: &Task,
        subtasks: &[WorkflowSubtask],
        provenance: &Provenance,
    ) -> Result<WorkflowProgress> {
        if subtasks.is_empty() {
            return Err(AppError::Decomposition("workflow has no steps".into()));
        }
        let mut workflow = Workflow::from_subtasks(task, provenance, subtasks);
        self.workflows.create(&workflow).await?;
        info!(
            workflow_id = %workflow.id,
            task_id = task.id.as_deref().unwrap_or("-"),
            steps = workflow.steps.len(),
            "workflow created"
        );

        let (released, skipped) = self.release(&mut workflow).await?;
        if workflow.is_complete() {
            // Nothing could be delivered; close the parent so it is not re-polled.
            if let Some(parent) = workflow.parent_task_id.as_deref() {
                if let Err(err) = self.status.finish(parent, TaskStatus::Error).await {
                    warn!(%err, task_id = parent, "failed to close undeliverable workflow parent");
                }
            }
        }
        Ok(WorkflowProgress {
            workflow,
            released,
            skipped,
            duplicate: false,
        })
    }

    /// Record a step result and dispatch any steps it unblocks.
    ///
    /// A result for a step that already reached a terminal status changes
    /// nothing and is reported as a duplicate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workflow or step does not exist.
    pub async fn advance_workflow(
        &self,
        workflow_id: &str,
        step_index: usize,
        succeeded: bool,
    ) -> Result<WorkflowProgress> {
        let mut workflow = self.workflows.get(workflow_id).await?;
        let step = workflow.steps.get_mut(step_index).ok_or_else(|| {
            AppError::NotFound(format!("workflow {workflow_id} step {step_index} not found"))
        })?;

        if step.status.is_terminal() {
            debug!(workflow_id, step_index, status = step.status.as_str(), "duplicate step result");
            return Ok(WorkflowProgress {
                workflow,
                released: Vec::new(),
                skipped: Vec::new(),
                duplicate: true,
            });
        }

        step.status = if succeeded {
            StepStatus::Done
        } else {
            StepStatus::Error
        };
        let new_status = step.status;
        self.workflows
            .set_step_status(workflow_id, step_index, new_status)
            .await?;
        info!(workflow_id, step_index, status = new_status.as_str(), "workflow step finished");

        let (released, skipped) = self.release(&mut workflow).await?;
        Ok(WorkflowProgress {
            workflow,
            released,
            skipped,
            duplicate: false,
        })
    }

    async fn release(&self, workflow: &mut Workflow) -> Result<(Vec<DispatchReceipt>, Vec<usize>)> {
        let provenance = Provenance {
            routed_by: RouteStrategy::Decomposer.label().to_owned(),
            source_file: workflow.source_file.clone(),
            source_name: workflow
                .source_name
                .clone()
                .unwrap_or_else(|| "workflow".to_owned()),
        };

        let mut released = Vec::new();
        for index in workflow.ready_steps() {
            let Some(task) = workflow.step_task(index) else {
                continue;
            };
            let worker = workflow.steps[index].agent.clone();
            let step = StepRef {
                workflow_id: workflow.id.clone(),
                step_index: index,
                depends_on: workflow.steps[index].depends_on,
                parent_task_id: workflow.parent_task_id.clone(),
            };

            let status = match self.deliver(&worker, task, &provenance, Some(&step)).await {
                Ok((dispatch_id, path)) => {
                    released.push(DispatchReceipt {
                        worker,
                        dispatch_id,
                        path,
                        step_index: Some(index),
                        status_synced: false,
                    });
                    StepStatus::Dispatched
                }
                Err(err) => {
                    warn!(%err, workflow_id = %workflow.id, step_index = index, "step dispatch failed");
                    StepStatus::Error
                }
            };
            workflow.steps[index].status = status;
            self.workflows
                .set_step_status(&workflow.id, index, status)
                .await?;
        }

        let skipped = workflow.cascade_skips();
        for &index in &skipped {
            self.workflows
                .set_step_status(&workflow.id, index, StepStatus::Skipped)
                .await?;
            info!(workflow_id = %workflow.id, step_index = index, "workflow step skipped");
        }

        if !released.is_empty() {
            let synced = self.sync_in_progress(workflow.parent_task_id.as_deref()).await;
            for receipt in &mut released {
                receipt.status_synced = synced;
            }
        }
        Ok((released, skipped))
    }

    async fn deliver(
        &self,
        worker: &str,
        task: Task,
        provenance: &Provenance,
        step: Option<&StepRef>,
    ) -> Result<(String, PathBuf)> {
        let max_pending = {
            let registry = read_registry(&self.registry);
            match registry.get(worker) {
                None => return Err(AppError::Dispatch(format!("unknown worker {worker}"))),
                Some(spec) if !spec.enabled => {
                    return Err(AppError::Dispatch(format!("worker {worker} is disabled")))
                }
                Some(spec) => spec.max_pending,
            }
        };

        if max_pending > 0 {
            let pending = self.mailbox.pending_count(worker).await?;
            if pending >= max_pending {
                return Err(AppError::Dispatch(format!(
                    "worker {worker} queue full ({pending}/{max_pending})"
                )));
            }
        }

        let envelope = MailboxEnvelope::new(task, provenance, step);
        let path = self.mailbox.deliver(worker, &envelope).await?;
        Ok((envelope.dispatch_id, path))
    }

    async fn sync_in_progress(&self, task_id: Option<&str>) -> bool {
        let Some(task_id) = task_id else {
            return false;
        };
        match self.status.mark_in_progress(task_id).await {
            Ok(()) => true,
            Err(AppError::NotFound(_)) => {
                debug!(task_id, "no durable record for dispatched task");
                false
            }
            Err(err) => {
                warn!(%err, task_id, "dispatched but status write failed");
                false
            }
        }
    }
}
