//! Task repository for `SQLite` persistence.
//!
//! The durable task record. Status writes here are unchecked; the state
//! machine is enforced one level up by the status synchronizer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::deliverable::Deliverable;
use crate::models::task::{Task, TaskStatus, TaskUpdate, UpdateStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    task_type: Option<String>,
    description: Option<String>,
    assigned_to: Option<String>,
    status: String,
    priority: Option<String>,
    user_id: Option<String>,
    conversation_id: Option<String>,
    workflow: i64,
    context: Option<String>,
    payload: Option<String>,
    extra: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid task status: {}", self.status)))?;
        let extra: Map<String, Value> = parse_json(self.extra.as_deref(), "extra")?
            .and_then(|v: Value| v.as_object().cloned())
            .unwrap_or_default();

        Ok(Task {
            id: Some(self.id),
            task_type: self.task_type,
            description: self.description,
            assigned_to: self.assigned_to,
            status,
            priority: self.priority,
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            workflow: self.workflow != 0,
            context: parse_json(self.context.as_deref(), "context")?,
            payload: parse_json(self.payload.as_deref(), "payload")?,
            updates: Vec::new(),
            extra,
        })
    }
}

/// Internal row struct for update entries.
#[derive(sqlx::FromRow)]
struct UpdateRow {
    agent: String,
    status: String,
    result: String,
    deliverable: Option<String>,
    workflow_id: Option<String>,
    step_index: Option<i64>,
    created_at: String,
}

impl UpdateRow {
    fn into_update(self) -> Result<TaskUpdate> {
        let status = match self.status.as_str() {
            "done" => UpdateStatus::Done,
            "error" => UpdateStatus::Error,
            other => return Err(AppError::Db(format!("invalid update status: {other}"))),
        };
        let result = serde_json::from_str(&self.result)
            .map_err(|e| AppError::Db(format!("invalid update result: {e}")))?;
        let deliverable: Option<Deliverable> = parse_json(self.deliverable.as_deref(), "deliverable")?;
        let step_index = self
            .step_index
            .map(usize::try_from)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid step_index: {e}")))?;

        Ok(TaskUpdate {
            agent: self.agent,
            result,
            status,
            deliverable,
            workflow_id: self.workflow_id,
            step_index,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: Option<&str>, field: &str) -> Result<Option<T>> {
    raw.map(serde_json::from_str)
        .transpose()
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn to_json<T: serde::Serialize>(value: Option<&T>, field: &str) -> Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::Db(format!("serialize {field}: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| AppError::Db(format!("invalid timestamp: {e}")))?
        .with_timezone(&Utc))
}

const TASK_COLUMNS: &str = "id, task_type, description, assigned_to, status, priority, user_id,
     conversation_id, workflow, context, payload, extra";

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a task, assigning an id when it has none.
    ///
    /// Updates already carried by the task are not persisted; they are
    /// appended through [`append_update`](Self::append_update).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, task: &Task) -> Result<Task> {
        let mut stored = task.clone();
        let id = stored
            .id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        stored.updates.clear();
        let now = Utc::now().to_rfc3339();
        let extra = Value::Object(stored.extra.clone());

        sqlx::query(
            "INSERT INTO task (id, task_type, description, assigned_to, status, priority,
             user_id, conversation_id, workflow, context, payload, extra, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        )
        .bind(&id)
        .bind(&stored.task_type)
        .bind(&stored.description)
        .bind(&stored.assigned_to)
        .bind(stored.status.as_str())
        .bind(&stored.priority)
        .bind(&stored.user_id)
        .bind(&stored.conversation_id)
        .bind(i64::from(stored.workflow))
        .bind(to_json(stored.context.as_ref(), "context")?)
        .bind(to_json(stored.payload.as_ref(), "payload")?)
        .bind(to_json(Some(&extra), "extra")?)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        Ok(stored)
    }

    /// Fetch a task and its updates, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find(&self, id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM task WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = row.into_task()?;
        task.updates = self.list_updates(id).await?;
        Ok(Some(task))
    }

    /// Fetch a task and its updates.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub async fn get(&self, id: &str) -> Result<Task> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {id} not found")))
    }

    /// Current status of a task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub async fn status(&self, id: &str) -> Result<TaskStatus> {
        let raw: Option<(String,)> = sqlx::query_as("SELECT status FROM task WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        let (raw,) = raw.ok_or_else(|| AppError::NotFound(format!("task {id} not found")))?;
        TaskStatus::parse(&raw).ok_or_else(|| AppError::Db(format!("invalid task status: {raw}")))
    }

    /// List tasks in a status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: TaskStatus, limit: u32) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM task WHERE status = ?1 ORDER BY created_at ASC LIMIT ?2"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Overwrite the status column.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no row was updated.
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let result = sqlx::query("UPDATE task SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("task {id} not found")));
        }
        Ok(())
    }

    /// Overwrite `priority` and/or `assigned_to`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no row was updated.
    pub async fn set_routing_fields(
        &self,
        id: &str,
        priority: Option<&str>,
        assigned_to: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE task SET priority = COALESCE(?1, priority),
             assigned_to = COALESCE(?2, assigned_to), updated_at = ?3 WHERE id = ?4",
        )
        .bind(priority)
        .bind(assigned_to)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("task {id} not found")));
        }
        Ok(())
    }

    /// Append an update entry. Entries are never merged or replaced.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown task, or `AppError::Db`
    /// if the insert fails.
    pub async fn append_update(&self, id: &str, update: &TaskUpdate) -> Result<()> {
        let status = match update.status {
            UpdateStatus::Done => "done",
            UpdateStatus::Error => "error",
        };
        let step_index = update
            .step_index
            .map(i64::try_from)
            .transpose()
            .map_err(|e| AppError::Db(format!("step_index out of range: {e}")))?;

        let touched = sqlx::query("UPDATE task SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if touched.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("task {id} not found")));
        }

        sqlx::query(
            "INSERT INTO task_update (task_id, agent, status, result, deliverable,
             workflow_id, step_index, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(id)
        .bind(&update.agent)
        .bind(status)
        .bind(to_json(Some(&update.result), "result")?)
        .bind(to_json(update.deliverable.as_ref(), "deliverable")?)
        .bind(&update.workflow_id)
        .bind(step_index)
        .bind(update.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// All update entries for a task, in append order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_updates(&self, id: &str) -> Result<Vec<TaskUpdate>> {
        let rows: Vec<UpdateRow> = sqlx::query_as(
            "SELECT agent, status, result, deliverable, workflow_id, step_index, created_at
             FROM task_update WHERE task_id = ?1 ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(UpdateRow::into_update).collect()
    }

    /// Purge terminal tasks last touched before `before`, with their updates.
    ///
    /// Returns the number of tasks deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64> {
        let before_str = before.to_rfc3339();
        sqlx::query(
            "DELETE FROM task_update WHERE task_id IN
             (SELECT id FROM task WHERE status IN ('done','error') AND updated_at < ?1)",
        )
        .bind(&before_str)
        .execute(self.db.as_ref())
        .await?;

        let result =
            sqlx::query("DELETE FROM task WHERE status IN ('done','error') AND updated_at < ?1")
                .bind(&before_str)
                .execute(self.db.as_ref())
                .await?;
        Ok(result.rows_affected())
    }
}
