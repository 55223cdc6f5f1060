//! HTTP surface: producer webhooks, task lookup, lifecycle write-back,
//! worker registration, and fleet health.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::health::monitor::SharedSnapshot;
use crate::orchestrator::status_sync::StatusSynchronizer;
use crate::persistence::task_repo::TaskRepo;
use crate::persistence::worker_repo::WorkerRepo;
use crate::routing::registry::SharedRegistry;
use crate::{AppError, Result};

/// Shared state for every handler.
pub struct AppState {
    /// Durable task store.
    pub tasks: TaskRepo,
    /// Policy-checked lifecycle writes.
    pub status: StatusSynchronizer,
    /// Live worker roster.
    pub registry: SharedRegistry,
    /// Persistence for runtime-registered workers.
    pub workers: WorkerRepo,
    /// Latest fleet health.
    pub health: SharedSnapshot,
    /// Wakes the store poller after a new task arrives.
    pub wake: Arc<Notify>,
}

/// Build the router over `state`.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::liveness))
        .route("/api/health", get(handlers::fleet_health))
        .route("/webhook/task", post(handlers::webhook_task))
        .route("/api/tasks", post(handlers::create_task))
        .route("/api/tasks/{id}", get(handlers::get_task))
        .route("/api/writeback", post(handlers::write_back))
        .route(
            "/api/workers",
            get(handlers::list_workers).post(handlers::register_worker),
        )
        .with_state(state)
}

/// Bind `host:port` and serve until the token fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or cannot be bound.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16, ct: CancellationToken) -> Result<()> {
    let bind: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|err| AppError::Config(format!("invalid http bind address {host}:{port}: {err}")))?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind http on {bind}: {err}")))?;
    serve_on(listener, state, ct).await
}

/// Serve on an already-bound listener until the token fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Config(format!("listener has no address: {err}")))?;
    info!(%local, "starting http api");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("http server error: {err}")))?;

    info!("http api shut down");
    Ok(())
}

impl AppError {
    /// Short machine-readable tag for API error payloads.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Db(_) => "db",
            Self::Io(_) => "io",
            Self::Routing(_) => "routing",
            Self::Llm(_) => "llm",
            Self::Decomposition(_) => "decomposition",
            Self::Dispatch(_) => "dispatch",
            Self::Reconcile(_) => "reconcile",
            Self::Health(_) => "health",
            Self::WriteDenied(_) => "write_denied",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Credentials(_) => "credentials",
            Self::Http(_) => "http",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::WriteDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.kind(), "detail": self.to_string() }));
        (status, body).into_response()
    }
}
