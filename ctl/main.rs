#![forbid(unsafe_code)]

//! `switchboard-ctl`: local CLI companion for `agent-switchboard`.
//!
//! Reads the same `config.toml` as the server and works directly on its
//! directories: drop a task into the inbox, dry-run the router, inspect a
//! worker's queue, or print the latest health snapshot.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use agent_switchboard::config::GlobalConfig;
use agent_switchboard::models::task::Task;
use agent_switchboard::orchestrator::mailbox::{publish_file, Mailbox};
use agent_switchboard::routing::registry::WorkerRegistry;
use agent_switchboard::routing::router::Router;
use agent_switchboard::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "switchboard-ctl",
    about = "Local CLI for agent-switchboard",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the server's TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Task fields shared by `submit` and `route`.
#[derive(Debug, clap::Args)]
struct TaskArgs {
    /// Task description.
    description: String,
    /// Coarse type hint.
    #[arg(long = "type")]
    task_type: Option<String>,
    /// Explicit worker override.
    #[arg(long)]
    assigned_to: Option<String>,
}

impl TaskArgs {
    fn to_task(&self) -> Task {
        let mut task = Task::new(self.task_type.as_deref(), &self.description);
        task.assigned_to.clone_from(&self.assigned_to);
        task
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a task file into the inbox.
    Submit {
        #[command(flatten)]
        task: TaskArgs,
        /// Ask for decomposition into a workflow.
        #[arg(long)]
        workflow: bool,
    },

    /// Show which worker the keyword router would pick.
    Route {
        #[command(flatten)]
        task: TaskArgs,
    },

    /// List envelopes waiting in a worker's queue.
    Queue {
        /// Worker name.
        worker: String,
    },

    /// Print the latest health snapshot.
    Health,
}

fn main() {
    let args = Cli::parse();

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|rt| rt.block_on(run(args)));

    if let Err(err) = outcome {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;

    match args.command {
        Command::Submit { task, workflow } => {
            let mut task = task.to_task();
            task.workflow = workflow;
            let body = serde_json::to_vec_pretty(&task)
                .map_err(|e| AppError::Validation(format!("cannot encode task: {e}")))?;
            let name = format!("ctl-{}.json", uuid::Uuid::new_v4().simple());
            let path = publish_file(config.inbox_dir.clone(), name, body).await?;
            println!("{}", path.display());
        }
        Command::Route { task } => {
            let router = Router::new(WorkerRegistry::from_config(&config).routing_table());
            match router.route(&task.to_task()) {
                Some(decision) => println!(
                    "{}",
                    serde_json::to_string_pretty(&decision).unwrap_or_default()
                ),
                None => println!("no rule matches; classifier and decomposer would be tried"),
            }
        }
        Command::Queue { worker } => {
            let mailbox = Mailbox::new(config.mailbox_root.clone());
            let pending = mailbox.pending(&worker.to_lowercase()).await?;
            if pending.is_empty() {
                println!("queue for {worker} is empty");
            }
            for path in pending {
                println!("{}", path.display());
            }
        }
        Command::Health => {
            let path = config.health_snapshot_path();
            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                AppError::NotFound(format!("no health snapshot at {}: {e}", path.display()))
            })?;
            println!("{raw}");
        }
    }
    Ok(())
}
