//! Periodic health polling of every worker's status endpoint.
//!
//! Probes run concurrently, each bounded by the configured timeout. The
//! resulting [`HealthSnapshot`] replaces the previous one in memory and is
//! written to the snapshot file through a same-directory rename.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::HealthConfig;
use crate::models::health::{HealthSnapshot, WorkerHealth, WorkerReport, WorkerStatus};
use crate::models::worker::WorkerSpec;
use crate::orchestrator::mailbox::replace_file;
use crate::routing::registry::{read_registry, SharedRegistry};
use crate::{AppError, Result};

/// Latest snapshot shared with the HTTP surface.
pub type SharedSnapshot = Arc<RwLock<HealthSnapshot>>;

/// Polls worker health endpoints.
pub struct HealthMonitor {
    client: reqwest::Client,
    registry: SharedRegistry,
    stale_after: chrono::Duration,
    snapshot: SharedSnapshot,
    snapshot_file: Option<PathBuf>,
}

impl HealthMonitor {
    /// Build a monitor from the `[health]` section.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Health` if the HTTP client cannot be built.
    pub fn new(
        config: &HealthConfig,
        registry: SharedRegistry,
        snapshot_file: Option<PathBuf>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| AppError::Health(format!("failed to build http client: {e}")))?;
        let stale_after = chrono::Duration::seconds(
            i64::try_from(config.stale_after_seconds).unwrap_or(i64::MAX / 1000),
        );

        Ok(Self {
            client,
            registry,
            stale_after,
            snapshot: Arc::new(RwLock::new(HealthSnapshot::default())),
            snapshot_file,
        })
    }

    /// Handle to the latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    /// Probe every worker once, publish and return the snapshot.
    pub async fn poll_once(&self) -> HealthSnapshot {
        let roster: Vec<WorkerSpec> = read_registry(&self.registry).workers().to_vec();
        let probes = roster.iter().map(|spec| async move {
            (spec.name.clone(), self.check_worker(spec).await)
        });
        let results = join_all(probes).await;

        let snapshot = HealthSnapshot {
            generated_at: Utc::now(),
            workers: results.into_iter().collect(),
        };
        info!(
            workers = snapshot.workers.len(),
            healthy = snapshot.healthy_count(),
            "health cycle complete"
        );

        *self.snapshot.write().await = snapshot.clone();
        if let Err(err) = self.write_snapshot(&snapshot).await {
            warn!(%err, "failed to write health snapshot");
        }
        snapshot
    }

    /// Probe a single worker.
    pub async fn check_worker(&self, spec: &WorkerSpec) -> WorkerHealth {
        if !spec.enabled {
            return WorkerHealth::failed(WorkerStatus::Offline, "worker disabled");
        }
        let Some(url) = spec.health_url.as_deref() else {
            return WorkerHealth::failed(WorkerStatus::Offline, "no health endpoint");
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(worker = %spec.name, %err, "health probe failed");
                return WorkerHealth::failed(WorkerStatus::Unreachable, err.to_string());
            }
        };
        if !response.status().is_success() {
            return WorkerHealth::failed(
                WorkerStatus::Unhealthy,
                format!("http status {}", response.status()),
            );
        }

        match response.json::<WorkerReport>().await {
            Ok(report) => classify_report(&report, Utc::now(), self.stale_after),
            Err(err) => WorkerHealth::failed(
                WorkerStatus::Unhealthy,
                format!("unparsable health body: {err}"),
            ),
        }
    }

    async fn write_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let Some(path) = self.snapshot_file.as_ref() else {
            return Ok(());
        };
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Health(format!("invalid snapshot path {}", path.display())))?;
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| AppError::Health(format!("failed to encode snapshot: {e}")))?;
        replace_file(dir, name, body).await.map(|_| ())
    }
}

/// Turn a parsed report into a health entry.
///
/// A status other than `ok`/`healthy` is unhealthy; a report timestamp
/// older than `stale_after` is stale.
#[must_use]
pub fn classify_report(
    report: &WorkerReport,
    now: DateTime<Utc>,
    stale_after: chrono::Duration,
) -> WorkerHealth {
    let current_task = report.current_task.as_ref().and_then(|v| match v {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    });
    let mut health = WorkerHealth {
        status: WorkerStatus::Ok,
        error: None,
        last_task_at: report.last_task_at.clone(),
        current_task,
        uptime_seconds: report.uptime_seconds,
        checked_at: now,
    };

    let reported = report
        .status
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    if reported != "ok" && reported != "healthy" {
        health.status = WorkerStatus::Unhealthy;
        health.error = Some(format!("worker reported status '{reported}'"));
        return health;
    }

    if let Some(ts) = report.timestamp {
        if now - ts > stale_after {
            health.status = WorkerStatus::Stale;
            health.error = Some(format!("last report at {}", ts.to_rfc3339()));
        }
    }
    health
}

/// Spawn the polling loop.
///
/// The first cycle runs immediately.
#[must_use]
pub fn spawn_health_monitor(
    monitor: Arc<HealthMonitor>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("health monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    monitor.poll_once().instrument(info_span!("health_cycle")).await;
                }
            }
        }
    })
}
