#![forbid(unsafe_code)]

//! `agent-switchboard`: task orchestration server binary.
//!
//! Bootstraps configuration and the task store, then runs the inbox and
//! outbox feeds, the store poller, the health monitor, and the HTTP API
//! until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_switchboard::api::{self, AppState};
use agent_switchboard::config::GlobalConfig;
use agent_switchboard::config_watcher::ConfigWatcher;
use agent_switchboard::health::monitor::{spawn_health_monitor, HealthMonitor};
use agent_switchboard::ingest::inbox::InboxProcessor;
use agent_switchboard::ingest::poller::spawn_store_poller;
use agent_switchboard::ingest::watcher::{spawn_consumer, spawn_directory_feed};
use agent_switchboard::journal::writer::JsonlJournalWriter;
use agent_switchboard::journal::RoutingJournal;
use agent_switchboard::orchestrator::dispatcher::Dispatcher;
use agent_switchboard::orchestrator::mailbox::Mailbox;
use agent_switchboard::orchestrator::notifier::spawn_notifier;
use agent_switchboard::orchestrator::pipeline::Pipeline;
use agent_switchboard::orchestrator::reconciler::Reconciler;
use agent_switchboard::orchestrator::status_sync::StatusSynchronizer;
use agent_switchboard::persistence::task_repo::TaskRepo;
use agent_switchboard::persistence::worker_repo::WorkerRepo;
use agent_switchboard::persistence::workflow_repo::WorkflowRepo;
use agent_switchboard::persistence::{db, retention};
use agent_switchboard::policy::writeback::WriteBackPolicy;
use agent_switchboard::routing::classifier::Classifier;
use agent_switchboard::routing::decomposer::Decomposer;
use agent_switchboard::routing::llm::{ChatCompletionsClient, CompletionProvider};
use agent_switchboard::routing::registry::{write_registry, WorkerRegistry};
use agent_switchboard::{AppError, Result};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-switchboard", about = "Task orchestration server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Disable the inference classifier and decomposer.
    #[arg(long)]
    no_inference: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-switchboard bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

#[allow(clippy::too_many_lines)]
async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.ensure_directories()?;

    let provider = if config.classifier.enabled && !args.no_inference {
        inference_provider(&mut config).await
    } else {
        info!("inference fallbacks disabled");
        None
    };
    let config = Arc::new(config);
    info!(workers = config.workers.len(), "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    // ── Worker roster ───────────────────────────────────
    let registry = WorkerRegistry::from_config(&config).into_shared();
    let worker_repo = WorkerRepo::new(Arc::clone(&db));
    for spec in worker_repo.list().await? {
        let name = spec.name.clone();
        if let Err(err) = write_registry(&registry).register(spec) {
            warn!(%err, worker = %name, "skipping stored worker");
        }
    }
    let _config_watcher = match ConfigWatcher::new(&args.config, Arc::clone(&registry)) {
        Ok(w) => Some(w),
        Err(err) => {
            warn!(%err, "config hot-reload unavailable");
            None
        }
    };

    // ── Core services ───────────────────────────────────
    let journal: Arc<dyn RoutingJournal> = Arc::new(JsonlJournalWriter::new(config.journal_dir())?);
    let tasks = TaskRepo::new(Arc::clone(&db));
    let status = StatusSynchronizer::new(tasks.clone(), WriteBackPolicy::from_config(&config.writeback));
    let dispatcher = Dispatcher::new(
        Mailbox::new(config.mailbox_root.clone()),
        status.clone(),
        WorkflowRepo::new(Arc::clone(&db)),
        Arc::clone(&registry),
    );

    let timeout = Duration::from_secs(config.classifier.timeout_seconds);
    let pipeline = Arc::new(
        Pipeline::new(
            Arc::clone(&registry),
            dispatcher.clone(),
            status.clone(),
            config.primary_outbox().to_path_buf(),
        )
        .with_classifier(Classifier::new(provider.clone(), timeout))
        .with_decomposer(Decomposer::new(provider, timeout))
        .with_journal(Arc::clone(&journal)),
    );

    let ct = CancellationToken::new();

    let (notify_tx, notify_rx) = mpsc::channel(256);
    let notifier_handle = spawn_notifier(notify_rx, config.notify.webhook_url.clone(), ct.clone());

    let reconciler = Arc::new(
        Reconciler::new(status.clone(), dispatcher, config.processed_dir.clone())
            .with_notifier(notify_tx)
            .with_journal(Arc::clone(&journal)),
    );
    let inbox = Arc::new(InboxProcessor::new(Arc::clone(&pipeline), config.processed_dir.clone()));

    // ── Directory feeds ─────────────────────────────────
    let rescan = Duration::from_secs(config.poll_interval_seconds);

    let (inbox_tx, inbox_rx) = mpsc::channel(FEED_CAPACITY);
    let _inbox_feed = spawn_directory_feed(config.inbox_dir.clone(), rescan, inbox_tx, ct.clone())?;
    let inbox_handle = spawn_consumer(inbox_rx, ct.clone(), move |path| {
        let inbox = Arc::clone(&inbox);
        async move {
            if let Err(err) = inbox.handle(&path).await {
                error!(%err, path = %path.display(), "inbox file left for retry");
            }
        }
    });

    let (outbox_tx, outbox_rx) = mpsc::channel(FEED_CAPACITY);
    let mut outbox_feeds = Vec::new();
    for dir in &config.outbox_dirs {
        outbox_feeds.push(spawn_directory_feed(dir.clone(), rescan, outbox_tx.clone(), ct.clone())?);
    }
    drop(outbox_tx);
    let outbox_handle = spawn_consumer(outbox_rx, ct.clone(), move |path| {
        let reconciler = Arc::clone(&reconciler);
        async move {
            if let Err(err) = reconciler.reconcile_file(&path).await {
                error!(%err, path = %path.display(), "result file left for retry");
            }
        }
    });

    // ── Store poller ────────────────────────────────────
    let wake = Arc::new(Notify::new());
    let poller_handle = spawn_store_poller(
        tasks.clone(),
        Arc::clone(&pipeline),
        rescan,
        Arc::clone(&wake),
        ct.clone(),
    );

    // ── Health monitor ──────────────────────────────────
    let monitor = Arc::new(HealthMonitor::new(
        &config.health,
        Arc::clone(&registry),
        Some(config.health_snapshot_path()),
    )?);
    let snapshot = monitor.snapshot();
    let health_handle = spawn_health_monitor(
        monitor,
        Duration::from_secs(config.health.interval_seconds),
        ct.clone(),
    );

    // ── Retention ───────────────────────────────────────
    let retention_handle = retention::spawn_retention_task(
        Arc::clone(&db),
        config.processed_dir.clone(),
        config.retention_days,
        ct.clone(),
    );

    // ── HTTP API ────────────────────────────────────────
    let state = Arc::new(AppState {
        tasks,
        status,
        registry,
        workers: worker_repo,
        health: snapshot,
        wake,
    });
    let api_ct = ct.clone();
    let host = config.http_host.clone();
    let port = config.http_port;
    let api_handle = tokio::spawn(async move {
        if let Err(err) = api::serve(state, &host, port, api_ct).await {
            error!(%err, "http api failed");
        }
    });

    info!("agent-switchboard ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let _ = tokio::join!(
        inbox_handle,
        outbox_handle,
        poller_handle,
        health_handle,
        retention_handle,
        notifier_handle,
        api_handle
    );
    info!("agent-switchboard shut down");
    Ok(())
}

/// Load the inference credential and build the shared client.
///
/// A missing credential disables the fallbacks instead of failing startup.
async fn inference_provider(config: &mut GlobalConfig) -> Option<Arc<dyn CompletionProvider>> {
    if let Err(err) = config.load_credentials().await {
        warn!(%err, "inference credential unavailable, fallbacks disabled");
        return None;
    }
    match ChatCompletionsClient::from_config(&config.classifier) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            warn!(%err, "inference client unavailable, fallbacks disabled");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
