//! Health polling against fake worker endpoints.
//!
//! | Worker     | Endpoint behaviour              | Status       |
//! |------------|---------------------------------|--------------|
//! | fresh      | `{"status":"ok"}` with now      | ok           |
//! | sick       | HTTP 500                        | unhealthy    |
//! | garbled    | 200 with a non-JSON body        | unhealthy    |
//! | tired      | `{"status":"degraded"}`         | unhealthy    |
//! | sleepy     | report timestamp an hour old    | stale        |
//! | ghost      | nothing listening               | unreachable  |
//! | quiet      | no health_url                   | offline      |
//! | reasoner   | disabled                        | offline      |

use std::time::Duration;

use agent_switchboard::config::{HealthConfig, RoutingConfig};
use agent_switchboard::health::monitor::{spawn_health_monitor, HealthMonitor};
use agent_switchboard::models::health::{HealthSnapshot, WorkerStatus};
use agent_switchboard::models::worker::WorkerSpec;
use agent_switchboard::routing::registry::{SharedRegistry, WorkerRegistry};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn fake_fleet() -> String {
    let app = Router::new()
        .route(
            "/fresh",
            get(|| async {
                Json(json!({
                    "agent": "fresh",
                    "status": "ok",
                    "current_task": "drafting",
                    "uptime_seconds": 42,
                    "timestamp": Utc::now(),
                }))
            }),
        )
        .route("/sick", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/garbled", get(|| async { "definitely not json" }))
        .route("/tired", get(|| async { Json(json!({ "status": "degraded" })) }))
        .route(
            "/sleepy",
            get(|| async {
                Json(json!({
                    "status": "healthy",
                    "timestamp": Utc::now() - chrono::Duration::hours(1),
                }))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake fleet");
    });
    format!("http://{addr}")
}

async fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}/health")
}

fn worker(name: &str, url: Option<String>) -> WorkerSpec {
    let mut spec = WorkerSpec::new(name, Vec::new());
    spec.health_url = url;
    spec
}

async fn fleet_registry() -> SharedRegistry {
    let base = fake_fleet().await;
    let mut reasoner = worker("reasoner", Some(format!("{base}/fresh")));
    reasoner.enabled = false;

    let workers = vec![
        worker("fresh", Some(format!("{base}/fresh"))),
        worker("sick", Some(format!("{base}/sick"))),
        worker("garbled", Some(format!("{base}/garbled"))),
        worker("tired", Some(format!("{base}/tired"))),
        worker("sleepy", Some(format!("{base}/sleepy"))),
        worker("ghost", Some(dead_url().await)),
        worker("quiet", None),
        reasoner,
    ];
    let routing = RoutingConfig {
        escalation_worker: "reasoner".into(),
        escalation_keywords: Vec::new(),
        decompose_min_length: 100,
    };
    WorkerRegistry::new(routing, workers, 32)
        .expect("roster")
        .into_shared()
}

fn health_config() -> HealthConfig {
    HealthConfig {
        interval_seconds: 30,
        timeout_seconds: 2,
        stale_after_seconds: 300,
        snapshot_file: None,
    }
}

#[tokio::test]
async fn every_outcome_is_classified() {
    let monitor = HealthMonitor::new(&health_config(), fleet_registry().await, None)
        .expect("monitor");

    let snapshot = monitor.poll_once().await;
    let status = |name: &str| snapshot.workers[name].status;

    assert_eq!(status("fresh"), WorkerStatus::Ok);
    assert_eq!(status("sick"), WorkerStatus::Unhealthy);
    assert_eq!(status("garbled"), WorkerStatus::Unhealthy);
    assert_eq!(status("tired"), WorkerStatus::Unhealthy);
    assert_eq!(status("sleepy"), WorkerStatus::Stale);
    assert_eq!(status("ghost"), WorkerStatus::Unreachable);
    assert_eq!(status("quiet"), WorkerStatus::Offline);
    assert_eq!(status("reasoner"), WorkerStatus::Offline);
    assert_eq!(snapshot.healthy_count(), 1);

    let fresh = &snapshot.workers["fresh"];
    assert_eq!(fresh.current_task.as_deref(), Some("drafting"));
    assert_eq!(fresh.uptime_seconds, Some(42));
    assert!(fresh.error.is_none());
    assert!(snapshot.workers["sick"].error.as_deref().expect("error").contains("500"));
}

#[tokio::test]
async fn snapshot_is_shared_and_rewritten_each_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("health.json");
    let monitor = HealthMonitor::new(&health_config(), fleet_registry().await, Some(path.clone()))
        .expect("monitor");

    let first = monitor.poll_once().await;
    let on_disk: HealthSnapshot =
        serde_json::from_slice(&std::fs::read(&path).expect("snapshot file")).expect("parse");
    assert_eq!(on_disk.workers.len(), first.workers.len());

    let second = monitor.poll_once().await;
    let on_disk: HealthSnapshot =
        serde_json::from_slice(&std::fs::read(&path).expect("snapshot file")).expect("parse");
    assert_eq!(on_disk.generated_at, second.generated_at, "file replaced, not kept");

    let shared = monitor.snapshot();
    assert_eq!(shared.read().await.generated_at, second.generated_at);
}

#[tokio::test]
async fn background_loop_publishes_first_cycle_immediately() {
    let monitor = std::sync::Arc::new(
        HealthMonitor::new(&health_config(), fleet_registry().await, None).expect("monitor"),
    );
    let shared = monitor.snapshot();
    let cancel = CancellationToken::new();
    let handle = spawn_health_monitor(monitor, Duration::from_secs(3600), cancel.clone());

    let mut populated = false;
    for _ in 0..60 {
        if !shared.read().await.workers.is_empty() {
            populated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(populated);

    cancel.cancel();
    handle.await.expect("monitor exits");
}
