//! Wire contract for mailbox envelopes.
//!
//! Workers read queue files directly, so the file name pattern and the
//! top-level JSON keys are a public interface:
//!
//! - file name: `<utc timestamp>-<dispatch_id>.json`
//! - original task fields flattened to the top level (`type`, `description`,
//!   and any unknown keys verbatim)
//! - provenance: `dispatch_id`, `routed_by`, `routed_at`, `source_name`,
//!   optional `source_file`
//! - workflow steps add `workflow_id`, `step_index`, `depends_on`,
//!   `parent_task_id`; single dispatches omit them

use agent_switchboard::models::envelope::{MailboxEnvelope, Provenance, StepRef};
use agent_switchboard::models::task::Task;
use agent_switchboard::orchestrator::mailbox::Mailbox;
use regex::Regex;
use serde_json::{json, Value};

fn task() -> Task {
    serde_json::from_value(json!({
        "id": "t-9",
        "type": "email",
        "description": "reply to Bob",
        "conversation_id": "c-1",
        "custom_flag": { "nested": true }
    }))
    .expect("task")
}

async fn delivered(envelope: &MailboxEnvelope) -> (String, Value) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mailbox = Mailbox::new(dir.path());
    let path = mailbox.deliver("drafter", envelope).await.expect("deliver");
    let name = path.file_name().expect("name").to_string_lossy().into_owned();
    let body = serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
    (name, body)
}

// ── File naming ──────────────────────────────────────────────

#[tokio::test]
async fn queue_file_name_sorts_by_time_and_embeds_dispatch_id() {
    let envelope = MailboxEnvelope::new(task(), &Provenance::file("router/type", "in.json"), None);
    let (name, _) = delivered(&envelope).await;

    let pattern = Regex::new(r"^\d{8}T\d{6}\.\d{6}Z-[0-9a-f-]{36}\.json$").expect("regex");
    assert!(pattern.is_match(&name), "unexpected queue file name {name}");
    assert!(name.contains(&envelope.dispatch_id));
}

// ── Single dispatch ──────────────────────────────────────────

#[tokio::test]
async fn single_dispatch_flattens_task_and_stamps_provenance() {
    let envelope = MailboxEnvelope::new(task(), &Provenance::file("router/type", "in.json"), None);
    let (_, body) = delivered(&envelope).await;

    assert_eq!(body["id"], "t-9");
    assert_eq!(body["type"], "email");
    assert_eq!(body["description"], "reply to Bob");
    assert_eq!(body["conversation_id"], "c-1");
    assert_eq!(body["custom_flag"], json!({ "nested": true }));

    assert_eq!(body["routed_by"], "router/type");
    assert_eq!(body["source_file"], "in.json");
    assert_eq!(body["source_name"], "in.json");
    assert!(body["routed_at"]
        .as_str()
        .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()));
    assert!(body["dispatch_id"].as_str().is_some_and(|s| !s.is_empty()));

    for key in ["workflow_id", "step_index", "depends_on", "parent_task_id", "task"] {
        assert!(body.get(key).is_none(), "{key} must be absent");
    }
}

#[tokio::test]
async fn store_dispatch_has_no_source_file() {
    let envelope = MailboxEnvelope::new(task(), &Provenance::named("classifier", "store"), None);
    let (_, body) = delivered(&envelope).await;

    assert!(body.get("source_file").is_none());
    assert_eq!(body["source_name"], "store");
}

// ── Workflow steps ───────────────────────────────────────────

#[tokio::test]
async fn step_dispatch_carries_workflow_fields() {
    let step = StepRef {
        workflow_id: "wf-1".into(),
        step_index: 1,
        depends_on: Some(0),
        parent_task_id: Some("t-9".into()),
    };
    let envelope = MailboxEnvelope::new(
        Task::new(None, "write the summary"),
        &Provenance::file("decomposer", "in.json"),
        Some(&step),
    );
    let (_, body) = delivered(&envelope).await;

    assert_eq!(body["workflow_id"], "wf-1");
    assert_eq!(body["step_index"], 1);
    assert_eq!(body["depends_on"], 0);
    assert_eq!(body["parent_task_id"], "t-9");
    assert_eq!(body["routed_by"], "decomposer");
}

#[test]
fn envelope_reads_back_what_workers_see() {
    let raw = json!({
        "dispatch_id": "d-1",
        "type": "email",
        "routed_by": "router/keyword",
        "routed_at": "2026-03-01T12:00:00Z",
        "source_name": "store",
        "extra_field": 5
    });
    let envelope: MailboxEnvelope = serde_json::from_value(raw).expect("envelope");
    assert_eq!(envelope.task.task_type.as_deref(), Some("email"));
    assert_eq!(envelope.task.extra.get("extra_field"), Some(&json!(5)));
    assert!(envelope.workflow_id.is_none());
}
