//! Workflow and workflow-step repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::workflow::{StepStatus, Workflow, WorkflowStep};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for decomposed workflows.
#[derive(Clone)]
pub struct WorkflowRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    parent_task_id: Option<String>,
    source_name: Option<String>,
    source_file: Option<String>,
    parent: String,
    created_at: String,
}

#[derive(sqlx::FromRow)]
struct StepRow {
    step_index: i64,
    agent: String,
    description: String,
    depends_on: Option<i64>,
    status: String,
}

impl StepRow {
    fn into_step(self) -> Result<WorkflowStep> {
        let status = StepStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid step status: {}", self.status)))?;
        let index = usize::try_from(self.step_index)
            .map_err(|e| AppError::Db(format!("invalid step_index: {e}")))?;
        let depends_on = self
            .depends_on
            .map(usize::try_from)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid depends_on: {e}")))?;

        Ok(WorkflowStep {
            index,
            agent: self.agent,
            description: self.description,
            depends_on,
            status,
        })
    }
}

fn index_to_i64(index: usize) -> Result<i64> {
    i64::try_from(index).map_err(|e| AppError::Db(format!("step index out of range: {e}")))
}

impl WorkflowRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a workflow and all of its steps in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any insert fails.
    pub async fn create(&self, workflow: &Workflow) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO workflow (id, parent_task_id, source_name, source_file, parent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&workflow.id)
        .bind(&workflow.parent_task_id)
        .bind(&workflow.source_name)
        .bind(&workflow.source_file)
        .bind(serde_json::to_string(&workflow.parent).map_err(|e| AppError::Db(e.to_string()))?)
        .bind(workflow.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for step in &workflow.steps {
            sqlx::query(
                "INSERT INTO workflow_step (workflow_id, step_index, agent, description,
                 depends_on, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&workflow.id)
            .bind(index_to_i64(step.index)?)
            .bind(&step.agent)
            .bind(&step.description)
            .bind(step.depends_on.map(index_to_i64).transpose()?)
            .bind(step.status.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load a workflow with its steps in index order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workflow does not exist.
    pub async fn get(&self, id: &str) -> Result<Workflow> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            "SELECT id, parent_task_id, source_name, source_file, parent, created_at
             FROM workflow WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        let row = row.ok_or_else(|| AppError::NotFound(format!("workflow {id} not found")))?;

        let steps: Vec<StepRow> = sqlx::query_as(
            "SELECT step_index, agent, description, depends_on, status
             FROM workflow_step WHERE workflow_id = ?1 ORDER BY step_index ASC",
        )
        .bind(id)
        .fetch_all(self.db.as_ref())
        .await?;

        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        let parent = serde_json::from_str(&row.parent)
            .map_err(|e| AppError::Db(format!("invalid workflow parent: {e}")))?;

        Ok(Workflow {
            id: row.id,
            parent_task_id: row.parent_task_id,
            source_name: row.source_name,
            source_file: row.source_file,
            parent,
            steps: steps
                .into_iter()
                .map(StepRow::into_step)
                .collect::<Result<_>>()?,
            created_at,
        })
    }

    /// Set a single step's status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the step does not exist.
    pub async fn set_step_status(
        &self,
        workflow_id: &str,
        step_index: usize,
        status: StepStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workflow_step SET status = ?1, updated_at = ?2
             WHERE workflow_id = ?3 AND step_index = ?4",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(workflow_id)
        .bind(index_to_i64(step_index)?)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "workflow {workflow_id} step {step_index} not found"
            )));
        }
        Ok(())
    }

    /// Delete workflows whose parent task no longer exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_orphaned(&self, before: DateTime<Utc>) -> Result<u64> {
        let before_str = before.to_rfc3339();
        let orphan_filter = "created_at < ?1 AND (parent_task_id IS NULL
             OR parent_task_id NOT IN (SELECT id FROM task))";

        sqlx::query(&format!(
            "DELETE FROM workflow_step WHERE workflow_id IN
             (SELECT id FROM workflow WHERE {orphan_filter})"
        ))
        .bind(&before_str)
        .execute(self.db.as_ref())
        .await?;

        let result = sqlx::query(&format!("DELETE FROM workflow WHERE {orphan_filter}"))
            .bind(&before_str)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
