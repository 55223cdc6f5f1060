//! Lifecycle writes to the durable task store.
//!
//! Every write goes through the write-back policy and the task state
//! machine. A transition to the current state is a no-op.

use tracing::{debug, info, warn};

use crate::models::task::{TaskStatus, TaskUpdate};
use crate::persistence::task_repo::TaskRepo;
use crate::policy::writeback::{WriteBackPolicy, TASKS_TABLE};
use crate::{AppError, Result};

/// Applies lifecycle transitions and updates.
#[derive(Clone)]
pub struct StatusSynchronizer {
    tasks: TaskRepo,
    policy: WriteBackPolicy,
}

impl StatusSynchronizer {
    /// Create a synchronizer over `tasks` guarded by `policy`.
    #[must_use]
    pub fn new(tasks: TaskRepo, policy: WriteBackPolicy) -> Self {
        Self { tasks, policy }
    }

    /// Underlying task repository.
    #[must_use]
    pub fn tasks(&self) -> &TaskRepo {
        &self.tasks
    }

    /// Write-back policy guarding every write.
    #[must_use]
    pub fn policy(&self) -> &WriteBackPolicy {
        &self.policy
    }

    /// Move a task to `next`, returning the status it had before.
    ///
    /// # Errors
    ///
    /// Returns `AppError::WriteDenied` if status writes are not allowed,
    /// `AppError::NotFound` for an unknown task, or
    /// `AppError::InvalidTransition` for an edge the state machine forbids.
    pub async fn transition(&self, task_id: &str, next: TaskStatus) -> Result<TaskStatus> {
        let current = self.check_transition(task_id, next).await?;
        if current == next {
            debug!(task_id, status = %next, "status unchanged");
            return Ok(current);
        }

        self.tasks.set_status(task_id, next).await?;
        info!(task_id, from = %current, to = %next, "task status changed");
        Ok(current)
    }

    /// Whether `next` may be written now, without writing it. Returns the
    /// current status.
    ///
    /// # Errors
    ///
    /// Same as [`StatusSynchronizer::transition`].
    pub async fn check_transition(&self, task_id: &str, next: TaskStatus) -> Result<TaskStatus> {
        self.policy.check(TASKS_TABLE, &["status"])?;

        let current = self.tasks.status(task_id).await?;
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "task {task_id}: {current} -> {next}"
            )));
        }
        Ok(current)
    }

    /// `inbox -> in_progress`, after a successful dispatch.
    ///
    /// # Errors
    ///
    /// See [`StatusSynchronizer::transition`].
    pub async fn mark_in_progress(&self, task_id: &str) -> Result<()> {
        self.transition(task_id, TaskStatus::InProgress).await.map(|_| ())
    }

    /// `inbox -> error`, for tasks no strategy could place.
    ///
    /// # Errors
    ///
    /// See [`StatusSynchronizer::transition`].
    pub async fn mark_unroutable(&self, task_id: &str) -> Result<()> {
        self.transition(task_id, TaskStatus::Error).await.map(|_| ())
    }

    /// Send a task back to `inbox` for re-routing.
    ///
    /// # Errors
    ///
    /// See [`StatusSynchronizer::transition`].
    pub async fn requeue(&self, task_id: &str) -> Result<()> {
        self.transition(task_id, TaskStatus::Inbox).await.map(|_| ())
    }

    /// Append an update to a task's history without touching its status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::WriteDenied` if `updates` is not writable, or a
    /// store error.
    pub async fn append_update(&self, task_id: &str, update: &TaskUpdate) -> Result<()> {
        self.policy.check(TASKS_TABLE, &["updates"])?;
        self.tasks.append_update(task_id, update).await
    }

    /// Append a worker's result and move the task to `terminal`.
    ///
    /// A task still in `inbox` is stepped through `in_progress` first. A
    /// task already in a terminal state keeps it; the update is still
    /// appended.
    ///
    /// # Errors
    ///
    /// Propagates policy and store failures.
    pub async fn record_result(
        &self,
        task_id: &str,
        update: &TaskUpdate,
        terminal: TaskStatus,
    ) -> Result<TaskStatus> {
        self.append_update(task_id, update).await?;
        self.finish(task_id, terminal).await
    }

    /// Move a task to `terminal` without appending anything.
    ///
    /// Returns the status the task ends up in.
    ///
    /// # Errors
    ///
    /// Propagates policy and store failures.
    pub async fn finish(&self, task_id: &str, terminal: TaskStatus) -> Result<TaskStatus> {
        let current = self.tasks.status(task_id).await?;
        if current.is_terminal() {
            if current != terminal {
                warn!(task_id, current = %current, wanted = %terminal, "task already terminal, keeping status");
            }
            return Ok(current);
        }
        if current == TaskStatus::Inbox {
            self.transition(task_id, TaskStatus::InProgress).await?;
        }
        self.transition(task_id, terminal).await?;
        Ok(terminal)
    }

    /// Apply whitelisted routing fields (`priority`, `assigned_to`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::WriteDenied` for a field outside the allow-list.
    pub async fn set_routing_fields(
        &self,
        task_id: &str,
        priority: Option<&str>,
        assigned_to: Option<&str>,
    ) -> Result<()> {
        let mut fields = Vec::new();
        if priority.is_some() {
            fields.push("priority");
        }
        if assigned_to.is_some() {
            fields.push("assigned_to");
        }
        if fields.is_empty() {
            return Ok(());
        }
        self.policy.check(TASKS_TABLE, &fields)?;
        self.tasks
            .set_routing_fields(task_id, priority, assigned_to)
            .await
    }
}
