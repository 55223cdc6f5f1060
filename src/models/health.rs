//! Worker health snapshot model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated status of one worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Responded and reported itself healthy.
    Ok,
    /// Responded with an error status or an unusable body.
    Unhealthy,
    /// Did not respond within the timeout.
    Unreachable,
    /// Responded, but its self-reported timestamp is too old.
    Stale,
    /// Disabled or has no health endpoint.
    Offline,
}

/// Point-in-time health of one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerHealth {
    /// Aggregated status.
    pub status: WorkerStatus,
    /// Explanation when `status` is not `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the worker last started a task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task_at: Option<String>,
    /// What the worker reports it is doing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    /// Worker process uptime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    /// When this entry was probed.
    pub checked_at: DateTime<Utc>,
}

impl WorkerHealth {
    /// Entry for a worker that was not (or could not be) probed successfully.
    #[must_use]
    pub fn failed(status: WorkerStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            last_task_at: None,
            current_task: None,
            uptime_seconds: None,
            checked_at: Utc::now(),
        }
    }
}

/// Status report returned by a worker's health endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerReport {
    /// Reporting worker.
    #[serde(default)]
    pub agent: Option<String>,
    /// Self-assessed status, `ok` when healthy.
    #[serde(default)]
    pub status: Option<String>,
    /// Last task start.
    #[serde(default)]
    pub last_task_at: Option<String>,
    /// Current task description.
    #[serde(default)]
    pub current_task: Option<serde_json::Value>,
    /// Process uptime.
    #[serde(default)]
    pub uptime_seconds: Option<u64>,
    /// When the worker produced this report.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Whole-fleet health, rebuilt every polling cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    /// When the cycle finished.
    pub generated_at: DateTime<Utc>,
    /// Per-worker entries keyed by worker name.
    pub workers: BTreeMap<String, WorkerHealth>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            generated_at: Utc::now(),
            workers: BTreeMap::new(),
        }
    }
}

impl HealthSnapshot {
    /// Number of workers currently reporting `ok`.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Ok)
            .count()
    }
}
