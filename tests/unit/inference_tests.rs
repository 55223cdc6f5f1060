//! Classifier and decomposer tests against a scripted completion provider.
//!
//! Both fallbacks must degrade to "no answer" on every failure mode:
//! call error, timeout, an answer outside the roster, or malformed output.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_switchboard::models::task::Task;
use agent_switchboard::models::worker::WorkerSpec;
use agent_switchboard::routing::classifier::{normalize_label, Classifier};
use agent_switchboard::routing::decomposer::{parse_subtasks, Decomposer};
use agent_switchboard::routing::llm::{extract_content, CompletionProvider, CompletionRequest};
use agent_switchboard::{AppError, Result};
use serde_json::json;

struct Scripted {
    answer: Mutex<Option<Result<String>>>,
    delay: Duration,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl Scripted {
    fn ok(answer: &str) -> Arc<Self> {
        Self::with(Ok(answer.to_owned()), Duration::ZERO)
    }

    fn with(answer: Result<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Some(answer)),
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl CompletionProvider for Scripted {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        self.seen.lock().unwrap().push(request);
        let answer = self
            .answer
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AppError::Llm("called twice".into())));
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            answer
        })
    }
}

fn roster() -> Vec<WorkerSpec> {
    let mut off = WorkerSpec::new("sleeper", Vec::new());
    off.enabled = false;
    vec![
        WorkerSpec::new("drafter", vec!["email".into()]),
        WorkerSpec::new("researcher", vec!["research".into()]),
        off,
    ]
}

fn task() -> Task {
    let mut t = Task::new(None, "find out what our competitors charge and write it up");
    t.id = Some("t-1".into());
    t
}

fn classifier(provider: Arc<Scripted>) -> Classifier {
    Classifier::new(Some(provider), Duration::from_millis(200))
}

fn decomposer(provider: Arc<Scripted>) -> Decomposer {
    Decomposer::new(Some(provider), Duration::from_millis(200))
}

// ── Classifier ───────────────────────────────────────────

#[tokio::test]
async fn classifier_accepts_roster_answer() {
    let provider = Scripted::ok("  Researcher.\n");
    let picked = classifier(Arc::clone(&provider)).classify(&task(), &roster()).await;
    assert_eq!(picked.as_deref(), Some("researcher"));

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].system.contains("drafter"));
    assert!(!seen[0].system.contains("sleeper"));
}

#[tokio::test]
async fn classifier_rejects_answer_outside_roster() {
    let picked = classifier(Scripted::ok("accountant")).classify(&task(), &roster()).await;
    assert!(picked.is_none());
}

#[tokio::test]
async fn classifier_rejects_disabled_worker() {
    let picked = classifier(Scripted::ok("sleeper")).classify(&task(), &roster()).await;
    assert!(picked.is_none());
}

#[tokio::test]
async fn classifier_none_answer_is_no_match() {
    let picked = classifier(Scripted::ok("none")).classify(&task(), &roster()).await;
    assert!(picked.is_none());
}

#[tokio::test]
async fn classifier_call_error_is_no_match() {
    let provider = Scripted::with(Err(AppError::Http("503".into())), Duration::ZERO);
    assert!(classifier(provider).classify(&task(), &roster()).await.is_none());
}

#[tokio::test]
async fn classifier_timeout_is_no_match() {
    let provider = Scripted::with(Ok("drafter".into()), Duration::from_secs(5));
    let started = std::time::Instant::now();
    assert!(classifier(provider).classify(&task(), &roster()).await.is_none());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn disabled_classifier_never_answers() {
    let c = Classifier::disabled();
    assert!(!c.is_enabled());
    assert!(c.classify(&task(), &roster()).await.is_none());
}

#[test]
fn normalize_label_strips_noise() {
    assert_eq!(normalize_label("`Drafter`"), "drafter");
    assert_eq!(normalize_label("\n  research-bot!\nbecause..."), "research-bot");
    assert_eq!(normalize_label(""), "");
}

#[test]
fn extract_content_reads_first_choice() {
    let payload = json!({"choices": [{"message": {"content": "drafter"}}]});
    assert_eq!(extract_content(&payload).expect("content"), "drafter");
    assert!(matches!(
        extract_content(&json!({"choices": []})),
        Err(AppError::Llm(_))
    ));
}

// ── Decomposer ───────────────────────────────────────────

fn known() -> Vec<String> {
    vec!["drafter".into(), "researcher".into()]
}

#[test]
fn parse_accepts_bare_array() {
    let raw = r#"[{"agent":"Researcher","description":"gather prices"},
                  {"agent":"drafter","description":"write summary","depends_on":0}]"#;
    let subtasks = parse_subtasks(raw, &known()).expect("parsed");
    assert_eq!(subtasks.len(), 2);
    assert_eq!(subtasks[0].agent, "researcher");
    assert_eq!(subtasks[0].depends_on, None);
    assert_eq!(subtasks[1].depends_on, Some(0));
}

#[test]
fn parse_accepts_fenced_array() {
    let raw = "Here you go:\n```json\n[{\"agent\":\"drafter\",\"description\":\"write\"}]\n```\n";
    let subtasks = parse_subtasks(raw, &known()).expect("parsed");
    assert_eq!(subtasks.len(), 1);
}

#[test]
fn parse_rejects_malformed_answers() {
    let cases = [
        ("no array here", "no JSON array"),
        ("[]", "empty"),
        (r#"[{"agent":"ghost","description":"x"}]"#, "unknown worker"),
        (r#"[{"agent":"drafter","description":"  "}]"#, "empty description"),
        (r#"[{"agent":"drafter","description":"a","depends_on":0}]"#, "does not precede"),
        (r#"[{"agent":"drafter"}]"#, "malformed"),
    ];
    for (raw, needle) in cases {
        match parse_subtasks(raw, &known()) {
            Err(AppError::Decomposition(msg)) => assert!(msg.contains(needle), "{raw}: {msg}"),
            other => panic!("{raw}: expected decomposition error, got {other:?}"),
        }
    }
}

#[test]
fn parse_rejects_more_than_five_steps() {
    let entries: Vec<_> = (0..6)
        .map(|i| json!({"agent": "drafter", "description": format!("step {i}")}))
        .collect();
    let raw = serde_json::to_string(&entries).expect("encode");
    assert!(matches!(
        parse_subtasks(&raw, &known()),
        Err(AppError::Decomposition(_))
    ));
}

#[tokio::test]
async fn decomposer_stamps_parent_id() {
    let provider = Scripted::ok(
        r#"[{"agent":"researcher","description":"gather prices"},
            {"agent":"drafter","description":"write it up","depends_on":0}]"#,
    );
    let subtasks = decomposer(provider)
        .decompose(&task(), &roster())
        .await
        .expect("subtasks");
    assert_eq!(subtasks.len(), 2);
    assert!(subtasks
        .iter()
        .all(|s| s.parent_task_id.as_deref() == Some("t-1")));
}

#[tokio::test]
async fn decomposer_discards_disabled_worker_steps() {
    let provider = Scripted::ok(r#"[{"agent":"sleeper","description":"nap"}]"#);
    assert!(decomposer(provider).decompose(&task(), &roster()).await.is_none());
}

#[tokio::test]
async fn decomposer_timeout_is_none() {
    let provider = Scripted::with(Ok("[]".into()), Duration::from_secs(5));
    assert!(decomposer(provider).decompose(&task(), &roster()).await.is_none());
}

#[tokio::test]
async fn disabled_decomposer_is_none() {
    assert!(Decomposer::disabled()
        .decompose(&task(), &roster())
        .await
        .is_none());
}
