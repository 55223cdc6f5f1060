//! Worker health report classification.

use agent_switchboard::health::monitor::classify_report;
use agent_switchboard::models::health::{HealthSnapshot, WorkerReport, WorkerStatus};
use chrono::{Duration, Utc};
use serde_json::json;

fn report(value: serde_json::Value) -> WorkerReport {
    serde_json::from_value(value).expect("report")
}

#[test]
fn ok_report_copies_fields() {
    let now = Utc::now();
    let health = classify_report(
        &report(json!({
            "agent": "drafter",
            "status": "OK",
            "last_task_at": "2024-01-01T00:00:00Z",
            "current_task": {"id": "t-1"},
            "uptime_seconds": 90,
            "timestamp": now.to_rfc3339(),
        })),
        now,
        Duration::seconds(300),
    );

    assert_eq!(health.status, WorkerStatus::Ok);
    assert!(health.error.is_none());
    assert_eq!(health.uptime_seconds, Some(90));
    assert_eq!(health.last_task_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    assert_eq!(health.current_task.as_deref(), Some(r#"{"id":"t-1"}"#));
}

#[test]
fn healthy_is_accepted_as_ok() {
    let health = classify_report(&report(json!({"status": "healthy"})), Utc::now(), Duration::seconds(1));
    assert_eq!(health.status, WorkerStatus::Ok);
}

#[test]
fn other_status_is_unhealthy() {
    for status in [json!("degraded"), json!(null)] {
        let health = classify_report(
            &report(json!({ "status": status })),
            Utc::now(),
            Duration::seconds(300),
        );
        assert_eq!(health.status, WorkerStatus::Unhealthy);
        assert!(health.error.is_some());
    }
}

#[test]
fn old_timestamp_is_stale() {
    let now = Utc::now();
    let health = classify_report(
        &report(json!({"status": "ok", "timestamp": (now - Duration::minutes(10)).to_rfc3339()})),
        now,
        Duration::seconds(300),
    );
    assert_eq!(health.status, WorkerStatus::Stale);
}

#[test]
fn string_current_task_is_kept_verbatim() {
    let health = classify_report(
        &report(json!({"status": "ok", "current_task": "drafting"})),
        Utc::now(),
        Duration::seconds(300),
    );
    assert_eq!(health.current_task.as_deref(), Some("drafting"));
}

#[test]
fn empty_snapshot_has_no_healthy_workers() {
    assert_eq!(HealthSnapshot::default().healthy_count(), 0);
}
