//! Task store and lifecycle synchronizer tests.
//!
//! Scenarios covered:
//! - insert assigns ids and preserves unknown fields
//! - update entries are appended in order, never merged
//! - transitions follow the state machine; self-transitions are no-ops
//! - result recording steps `inbox` through `in_progress`
//! - terminal tasks keep their status but still gain updates
//! - the write-back allow-list gates status and update writes

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_switchboard::config::WriteBackConfig;
use agent_switchboard::models::task::{Task, TaskStatus, TaskUpdate, UpdateStatus};
use agent_switchboard::orchestrator::status_sync::StatusSynchronizer;
use agent_switchboard::persistence::db;
use agent_switchboard::persistence::task_repo::TaskRepo;
use agent_switchboard::policy::writeback::WriteBackPolicy;
use agent_switchboard::AppError;
use chrono::Utc;
use serde_json::json;

async fn repo() -> TaskRepo {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    TaskRepo::new(db)
}

fn sync(tasks: TaskRepo) -> StatusSynchronizer {
    StatusSynchronizer::new(tasks, WriteBackPolicy::from_config(&WriteBackConfig::default()))
}

fn update(agent: &str, result: &str) -> TaskUpdate {
    TaskUpdate {
        agent: agent.into(),
        result: json!(result),
        status: UpdateStatus::Done,
        deliverable: None,
        workflow_id: None,
        step_index: None,
        created_at: Utc::now(),
    }
}

// ── Repository ───────────────────────────────────────────

#[tokio::test]
async fn insert_assigns_id_and_round_trips() {
    let tasks = repo().await;
    let mut task = Task::new(Some("email"), "draft a note");
    task.priority = Some("high".into());
    task.conversation_id = Some("c-1".into());
    task.context = Some(json!({"thread": 9}));
    task.extra.insert("chat_id".into(), json!(42));

    let stored = tasks.insert(&task).await.expect("insert");
    let id = stored.id.clone().expect("id assigned");

    let loaded = tasks.get(&id).await.expect("get");
    assert_eq!(loaded.task_type.as_deref(), Some("email"));
    assert_eq!(loaded.priority.as_deref(), Some("high"));
    assert_eq!(loaded.conversation_id.as_deref(), Some("c-1"));
    assert_eq!(loaded.context, Some(json!({"thread": 9})));
    assert_eq!(loaded.extra["chat_id"], json!(42));
    assert_eq!(loaded.status, TaskStatus::Inbox);
}

#[tokio::test]
async fn insert_keeps_caller_id() {
    let tasks = repo().await;
    let mut task = Task::new(None, "x");
    task.id = Some("fixed-id".into());
    tasks.insert(&task).await.expect("insert");
    assert!(tasks.find("fixed-id").await.expect("find").is_some());
    assert!(tasks.find("other").await.expect("find").is_none());
}

#[tokio::test]
async fn updates_append_in_order() {
    let tasks = repo().await;
    let id = tasks
        .insert(&Task::new(None, "x"))
        .await
        .expect("insert")
        .id
        .expect("id");

    tasks.append_update(&id, &update("a", "first")).await.expect("append");
    tasks.append_update(&id, &update("a", "second")).await.expect("append");

    let updates = tasks.list_updates(&id).await.expect("list");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].result, json!("first"));
    assert_eq!(updates[1].result, json!("second"));
}

#[tokio::test]
async fn append_to_unknown_task_is_not_found() {
    let tasks = repo().await;
    let result = tasks.append_update("missing", &update("a", "x")).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn list_by_status_is_oldest_first() {
    let tasks = repo().await;
    let first = tasks.insert(&Task::new(None, "one")).await.expect("insert");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    tasks.insert(&Task::new(None, "two")).await.expect("insert");

    let inbox = tasks.list_by_status(TaskStatus::Inbox, 10).await.expect("list");
    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[0].id, first.id);
    assert!(tasks
        .list_by_status(TaskStatus::Done, 10)
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn routing_fields_only_overwrite_given_values() {
    let tasks = repo().await;
    let mut task = Task::new(None, "x");
    task.priority = Some("low".into());
    let id = tasks.insert(&task).await.expect("insert").id.expect("id");

    tasks
        .set_routing_fields(&id, None, Some("drafter"))
        .await
        .expect("set");
    let loaded = tasks.get(&id).await.expect("get");
    assert_eq!(loaded.priority.as_deref(), Some("low"));
    assert_eq!(loaded.assigned_to.as_deref(), Some("drafter"));
}

// ── Lifecycle synchronizer ───────────────────────────────

#[tokio::test]
async fn transition_returns_previous_status() {
    let tasks = repo().await;
    let id = tasks.insert(&Task::new(None, "x")).await.expect("insert").id.expect("id");
    let s = sync(tasks.clone());

    assert_eq!(
        s.transition(&id, TaskStatus::InProgress).await.expect("move"),
        TaskStatus::Inbox
    );
    assert_eq!(
        s.transition(&id, TaskStatus::InProgress).await.expect("no-op"),
        TaskStatus::InProgress
    );
    assert_eq!(tasks.status(&id).await.expect("status"), TaskStatus::InProgress);
}

#[tokio::test]
async fn forbidden_transition_is_rejected() {
    let tasks = repo().await;
    let id = tasks.insert(&Task::new(None, "x")).await.expect("insert").id.expect("id");
    let s = sync(tasks.clone());

    let err = s.transition(&id, TaskStatus::Done).await.expect_err("inbox -> done");
    assert!(matches!(err, AppError::InvalidTransition(_)));
    assert_eq!(tasks.status(&id).await.expect("status"), TaskStatus::Inbox);
}

#[tokio::test]
async fn record_result_steps_inbox_through_in_progress() {
    let tasks = repo().await;
    let id = tasks.insert(&Task::new(None, "x")).await.expect("insert").id.expect("id");
    let s = sync(tasks.clone());

    let status = s
        .record_result(&id, &update("drafter", "ok"), TaskStatus::Done)
        .await
        .expect("record");
    assert_eq!(status, TaskStatus::Done);
    assert_eq!(tasks.list_updates(&id).await.expect("updates").len(), 1);
}

#[tokio::test]
async fn terminal_task_keeps_status_but_gains_update() {
    let tasks = repo().await;
    let id = tasks.insert(&Task::new(None, "x")).await.expect("insert").id.expect("id");
    let s = sync(tasks.clone());

    s.record_result(&id, &update("drafter", "first"), TaskStatus::Done)
        .await
        .expect("first");
    let status = s
        .record_result(&id, &update("drafter", "late error"), TaskStatus::Error)
        .await
        .expect("second");

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(tasks.list_updates(&id).await.expect("updates").len(), 2);
}

#[tokio::test]
async fn requeue_restarts_cycle() {
    let tasks = repo().await;
    let id = tasks.insert(&Task::new(None, "x")).await.expect("insert").id.expect("id");
    let s = sync(tasks.clone());

    s.mark_unroutable(&id).await.expect("error");
    s.requeue(&id).await.expect("requeue");
    assert_eq!(tasks.status(&id).await.expect("status"), TaskStatus::Inbox);
}

#[tokio::test]
async fn policy_without_updates_blocks_result_recording() {
    let tasks = repo().await;
    let id = tasks.insert(&Task::new(None, "x")).await.expect("insert").id.expect("id");
    let mut allow = BTreeMap::new();
    allow.insert("tasks".to_owned(), vec!["status".to_owned()]);
    let s = StatusSynchronizer::new(tasks.clone(), WriteBackPolicy::from_config(&WriteBackConfig { allow }));

    let err = s
        .record_result(&id, &update("drafter", "ok"), TaskStatus::Done)
        .await
        .expect_err("denied");
    assert!(matches!(err, AppError::WriteDenied(_)));
    assert!(tasks.list_updates(&id).await.expect("updates").is_empty());
    assert_eq!(tasks.status(&id).await.expect("status"), TaskStatus::Inbox);

    let err = s
        .set_routing_fields(&id, Some("high"), None)
        .await
        .expect_err("denied");
    assert!(matches!(err, AppError::WriteDenied(_)));
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let s = sync(repo().await);
    assert!(matches!(
        s.mark_in_progress("nope").await,
        Err(AppError::NotFound(_))
    ));
}
