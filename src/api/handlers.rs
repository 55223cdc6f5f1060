//! Route handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::AppState;
use crate::models::health::HealthSnapshot;
use crate::models::task::{Task, TaskStatus, TaskUpdate};
use crate::models::worker::WorkerSpec;
use crate::policy::writeback::TASKS_TABLE;
use crate::routing::registry::{read_registry, write_registry};
use crate::{AppError, Result};

type Shared = State<Arc<AppState>>;

/// `GET /health`: process liveness.
pub async fn liveness() -> &'static str {
    "ok"
}

/// `GET /api/health`: latest fleet snapshot.
pub async fn fleet_health(State(state): Shared) -> Json<HealthSnapshot> {
    Json(state.health.read().await.clone())
}

/// `POST /webhook/task`: a record-change notification from a producer.
///
/// Accepts `{ "record": { ... } }` or a flat task object. A record the
/// store already holds is not inserted again. Routing happens on the
/// poller, which this call wakes.
pub async fn webhook_task(
    State(state): Shared,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>)> {
    let record = match body.get("record") {
        Some(inner @ Value::Object(_)) => inner.clone(),
        _ => body,
    };
    let mut task = parse_task(record)?;

    let existing = match task.id.as_deref() {
        Some(id) => state.tasks.find(id).await?,
        None => None,
    };
    let stored = if let Some(existing) = existing {
        existing
    } else {
        task.status = TaskStatus::Inbox;
        task.updates.clear();
        state.tasks.insert(&task).await?
    };

    if stored.status == TaskStatus::Inbox {
        state.wake.notify_one();
    }
    info!(task_id = stored.id.as_deref().unwrap_or("-"), "webhook task accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": stored.id, "status": stored.status })),
    ))
}

/// `POST /api/tasks`: create a task from a chat or structured producer.
pub async fn create_task(
    State(state): Shared,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Task>)> {
    let mut task = parse_task(body)?;
    task.status = TaskStatus::Inbox;
    task.updates.clear();
    let stored = state.tasks.insert(&task).await?;
    state.wake.notify_one();
    info!(task_id = stored.id.as_deref().unwrap_or("-"), "task created");
    Ok((StatusCode::CREATED, Json(stored)))
}

/// `GET /api/tasks/{id}`: a task with its update history.
pub async fn get_task(State(state): Shared, Path(id): Path<String>) -> Result<Json<Task>> {
    Ok(Json(state.tasks.get(&id).await?))
}

/// Body of `POST /api/writeback`.
#[derive(Debug, Deserialize)]
pub struct WriteBackRequest {
    /// Target table.
    pub table: String,
    /// Record id.
    pub id: String,
    /// Field values to write.
    pub fields: Map<String, Value>,
}

/// `POST /api/writeback`: lifecycle writes from workers and tools.
///
/// The request is checked as a whole before anything is written: field
/// names against the allow-list (`403`), values (`400`), the task's
/// existence (`404`) and the status transition (`409`). A rejected request
/// leaves the record untouched.
pub async fn write_back(
    State(state): Shared,
    Json(request): Json<WriteBackRequest>,
) -> Result<Json<Value>> {
    let names: Vec<&str> = request.fields.keys().map(String::as_str).collect();
    state.status.policy().check(&request.table, &names)?;
    if request.table != TASKS_TABLE {
        return Err(AppError::Validation(format!(
            "no writer for table {}",
            request.table
        )));
    }

    let id = request.id.as_str();
    let priority = optional_string(&request.fields, "priority")?;
    let assigned_to = optional_string(&request.fields, "assigned_to")?;
    let updates = request.fields.get("updates").map(parse_updates).transpose()?;
    let status = request.fields.get("status").map(parse_status).transpose()?;

    match status {
        Some(next) => state.status.check_transition(id, next).await?,
        None => state.status.tasks().status(id).await?,
    };

    let mut applied = Vec::new();
    if priority.is_some() || assigned_to.is_some() {
        state
            .status
            .set_routing_fields(id, priority.as_deref(), assigned_to.as_deref())
            .await?;
        applied.extend(priority.as_ref().map(|_| "priority"));
        applied.extend(assigned_to.as_ref().map(|_| "assigned_to"));
    }
    if let Some(updates) = updates {
        for update in &updates {
            state.status.append_update(id, update).await?;
        }
        applied.push("updates");
    }
    if let Some(next) = status {
        state.status.transition(id, next).await?;
        applied.push("status");
    }

    Ok(Json(json!({ "id": id, "applied": applied })))
}

fn parse_updates(value: &Value) -> Result<Vec<TaskUpdate>> {
    match value {
        Value::Array(_) => serde_json::from_value(value.clone()),
        _ => serde_json::from_value(value.clone()).map(|u| vec![u]),
    }
    .map_err(|e| AppError::Validation(format!("invalid updates: {e}")))
}

fn parse_status(value: &Value) -> Result<TaskStatus> {
    let raw = value
        .as_str()
        .ok_or_else(|| AppError::Validation("status must be a string".into()))?;
    TaskStatus::parse(raw).ok_or_else(|| AppError::Validation(format!("unknown status {raw}")))
}

/// `GET /api/workers`: the live roster.
pub async fn list_workers(State(state): Shared) -> Json<Vec<WorkerSpec>> {
    Json(read_registry(&state.registry).workers().to_vec())
}

/// `POST /api/workers`: register a worker at runtime.
pub async fn register_worker(
    State(state): Shared,
    Json(spec): Json<WorkerSpec>,
) -> Result<(StatusCode, Json<WorkerSpec>)> {
    let registered = write_registry(&state.registry).register(spec)?;
    if let Err(err) = state.workers.insert(&registered).await {
        warn!(%err, worker = %registered.name, "registered worker not persisted, rolling back");
        write_registry(&state.registry).remove_registered(&registered.name);
        return Err(err);
    }
    Ok((StatusCode::CREATED, Json(registered)))
}

fn parse_task(value: Value) -> Result<Task> {
    let task: Task = serde_json::from_value(value)
        .map_err(|e| AppError::Validation(format!("invalid task: {e}")))?;
    if !task.is_well_formed() {
        return Err(AppError::Validation(
            "task needs a type or a description".into(),
        ));
    }
    Ok(task)
}

fn optional_string(fields: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(AppError::Validation(format!("{key} must be a string"))),
    }
}
