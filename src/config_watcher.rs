//! Hot-reload watcher for the worker roster in `config.toml`.
//!
//! [`ConfigWatcher`] uses the `notify` crate to watch `config.toml`. When
//! the file changes it re-parses only the `[routing]` table and the
//! `[[worker]]` entries and swaps them into the shared registry. Workers
//! registered at runtime survive the reload. Every other setting needs a
//! restart.
//!
//! The registry sits behind a `std::sync::RwLock`, so the synchronous
//! `notify` callback can update it without an async context.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::RoutingConfig;
use crate::models::worker::WorkerSpec;
use crate::routing::registry::{write_registry, SharedRegistry};
use crate::{AppError, Result};

/// Only the roster-related parts of the config file.
#[derive(Debug, Deserialize)]
struct RosterOnlyConfig {
    routing: RoutingConfig,
    #[serde(default, rename = "worker")]
    workers: Vec<WorkerSpec>,
}

/// Parse the `[routing]` table and `[[worker]]` entries from a TOML file.
///
/// Unknown keys are ignored, so the full `config.toml` can be passed.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be read or the roster
/// sections are invalid.
pub fn parse_roster(path: &Path) -> Result<(RoutingConfig, Vec<WorkerSpec>)> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("failed to read config for roster reload: {err}")))?;
    let parsed: RosterOnlyConfig = toml::from_str(&raw)
        .map_err(|err| AppError::Config(format!("failed to parse worker roster: {err}")))?;
    Ok((parsed.routing, parsed.workers))
}

/// Re-read the roster from `path` and apply it to `registry`.
///
/// The registry is unchanged if parsing or validation fails.
///
/// # Errors
///
/// Returns `AppError::Config` or `AppError::Validation` from parsing or
/// roster validation.
pub fn reload_into(path: &Path, registry: &SharedRegistry) -> Result<()> {
    let (routing, workers) = parse_roster(path)?;
    write_registry(registry).reload_declared(workers, routing)
}

fn is_config_change(event: &Event, config_path: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == config_path.file_name())
}

/// Keeps a `notify` watcher on the config file alive.
///
/// Dropping it stops the OS watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `config_path` and reload into `registry` on change.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the watcher cannot be created.
    pub fn new(config_path: &Path, registry: SharedRegistry) -> Result<Self> {
        let path_for_callback: PathBuf = config_path.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_config_change(&event, &path_for_callback) => {
                    match reload_into(&path_for_callback, &registry) {
                        Ok(()) => info!(
                            path = %path_for_callback.display(),
                            "hot-reloaded worker roster from config"
                        ),
                        Err(err) => warn!(
                            %err,
                            path = %path_for_callback.display(),
                            "failed to reload worker roster, keeping previous roster"
                        ),
                    }
                }
                Err(err) => warn!(%err, "config file watcher error"),
                _ => {}
            },
        )
        .map_err(|err| AppError::Config(format!("failed to create config file watcher: {err}")))?;

        // Watch the directory so rename-based saves are seen.
        let watch_target = config_path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(config_path);

        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Config(format!(
                    "failed to watch config path '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %config_path.display(), "config watcher started for roster hot-reload");
        Ok(Self { _watcher: watcher })
    }
}
