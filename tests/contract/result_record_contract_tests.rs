//! Wire contract for outbox result records.
//!
//! Workers write one JSON object per result. Recognised keys:
//!
//! | Key                        | Meaning                                   |
//! |----------------------------|-------------------------------------------|
//! | `agent`                    | producing worker                          |
//! | `result`                   | free-form payload                         |
//! | `status`                   | `error` marks failure, anything else done |
//! | `task_id`                  | direct correlation                        |
//! | `task_source`              | inbox file name, optional `#step-N`       |
//! | `output_file`/`file_path`  | artifact path                             |
//! | `workflow_id`/`step_index` | workflow step correlation                 |
//!
//! Unknown keys survive a read/write cycle. Router error records use the
//! same shape with `agent = "router"`.

use std::sync::Arc;

use agent_switchboard::config::{RoutingConfig, WriteBackConfig};
use agent_switchboard::models::result::ResultRecord;
use agent_switchboard::models::task::Task;
use agent_switchboard::models::worker::WorkerSpec;
use agent_switchboard::orchestrator::dispatcher::Dispatcher;
use agent_switchboard::orchestrator::mailbox::Mailbox;
use agent_switchboard::orchestrator::pipeline::{
    Pipeline, PipelineOutcome, TaskOrigin, ROUTER_AGENT, UNROUTABLE,
};
use agent_switchboard::orchestrator::status_sync::StatusSynchronizer;
use agent_switchboard::persistence::db;
use agent_switchboard::persistence::task_repo::TaskRepo;
use agent_switchboard::persistence::workflow_repo::WorkflowRepo;
use agent_switchboard::policy::writeback::WriteBackPolicy;
use agent_switchboard::routing::registry::WorkerRegistry;
use serde_json::{json, Value};

// ── Worker records ───────────────────────────────────────────

#[test]
fn minimal_record_is_success() {
    let record: ResultRecord = serde_json::from_value(json!({ "agent": "drafter" })).expect("parse");
    assert!(!record.is_error());
    assert!(record.result.is_null());
    assert!(record.artifact_path().is_none());
}

#[test]
fn error_status_is_case_insensitive() {
    for status in ["error", "ERROR", "Error"] {
        let record: ResultRecord =
            serde_json::from_value(json!({ "agent": "a", "status": status })).expect("parse");
        assert!(record.is_error(), "{status}");
    }
    let record: ResultRecord =
        serde_json::from_value(json!({ "agent": "a", "status": "partial" })).expect("parse");
    assert!(!record.is_error());
}

#[test]
fn output_file_wins_over_file_path() {
    let record: ResultRecord = serde_json::from_value(json!({
        "agent": "a",
        "output_file": "out/report.pdf",
        "file_path": "other.txt"
    }))
    .expect("parse");
    assert_eq!(record.artifact_path(), Some("out/report.pdf"));

    let record: ResultRecord =
        serde_json::from_value(json!({ "agent": "a", "output_file": "  ", "file_path": "x.txt" }))
            .expect("parse");
    assert_eq!(record.artifact_path(), Some("x.txt"));
}

#[test]
fn unknown_keys_survive_a_rewrite() {
    let raw = json!({
        "agent": "researcher",
        "result": { "summary": "done" },
        "task_id": "t-1",
        "tokens_used": 1234,
        "model": "whatever"
    });
    let record: ResultRecord = serde_json::from_value(raw.clone()).expect("parse");
    assert_eq!(record.extra.get("tokens_used"), Some(&json!(1234)));

    let rewritten = serde_json::to_value(&record).expect("encode");
    assert_eq!(rewritten, raw);
}

#[test]
fn workflow_fields_are_read() {
    let record: ResultRecord = serde_json::from_value(json!({
        "agent": "drafter",
        "workflow_id": "wf-1",
        "step_index": 2,
        "task_source": "in.json#step-2"
    }))
    .expect("parse");
    assert_eq!(record.workflow_id.as_deref(), Some("wf-1"));
    assert_eq!(record.step_index, Some(2));
    assert_eq!(record.task_source.as_deref(), Some("in.json#step-2"));
}

// ── Router error records ─────────────────────────────────────

#[tokio::test]
async fn unroutable_record_shape() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database = Arc::new(db::connect_memory().await.expect("db"));
    let routing = RoutingConfig {
        escalation_worker: "reasoner".into(),
        escalation_keywords: vec!["legal".into()],
        decompose_min_length: 100,
    };
    let registry = WorkerRegistry::new(
        routing,
        vec![
            WorkerSpec::new("drafter", vec!["email".into()]),
            WorkerSpec::new("reasoner", Vec::new()),
        ],
        8,
    )
    .expect("registry")
    .into_shared();
    let status = StatusSynchronizer::new(
        TaskRepo::new(Arc::clone(&database)),
        WriteBackPolicy::from_config(&WriteBackConfig::default()),
    );
    let dispatcher = Dispatcher::new(
        Mailbox::new(dir.path().join("mailboxes")),
        status.clone(),
        WorkflowRepo::new(Arc::clone(&database)),
        Arc::clone(&registry),
    );
    let outbox = dir.path().join("outbox");
    std::fs::create_dir_all(&outbox).expect("outbox");
    let pipeline = Pipeline::new(registry, dispatcher, status, outbox);

    let task: Task = serde_json::from_value(json!({ "type": "astrology", "mood": "hopeful" }))
        .expect("task");
    let outcome = pipeline
        .process(task, &TaskOrigin::File { name: "stars.json".into() })
        .await
        .expect("process");
    let PipelineOutcome::Unroutable { record, code, .. } = outcome else {
        panic!("expected unroutable, got {outcome:?}");
    };
    assert_eq!(code, UNROUTABLE);

    let name = record.file_name().expect("name").to_string_lossy().into_owned();
    assert!(name.starts_with("unroutable-") && name.ends_with(".json"), "{name}");

    let body: Value = serde_json::from_slice(&std::fs::read(&record).expect("read")).expect("json");
    assert_eq!(body["agent"], ROUTER_AGENT);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], UNROUTABLE);
    assert_eq!(body["result"]["error"], UNROUTABLE);
    assert!(body["explanation"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(body["task_source"], "stars.json");
    assert_eq!(body["original_task"]["type"], "astrology");
    assert_eq!(body["original_task"]["mood"], "hopeful");
    assert!(body.get("task_id").is_none(), "file tasks carry no durable id");
    assert!(body["completed_at"]
        .as_str()
        .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()));
}
