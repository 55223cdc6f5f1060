//! Directory feeds for the inbox and outbox directories.
//!
//! A `notify` watcher is the primary discovery path; an interval rescan
//! backs it up for filesystems where events are missed. Both push paths
//! into one `mpsc` channel, so a file can be seen more than once. The
//! consumer treats a vanished path as already handled.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Whether `path` is a visible `*.json` file.
#[must_use]
pub fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Candidate files directly inside `dir`, sorted by name.
pub async fn scan(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), %err, "directory scan failed");
            return Vec::new();
        }
    };
    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if is_candidate(&path) && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            found.push(path);
        }
    }
    found.sort();
    found
}

/// A running directory feed. Dropping it stops the OS watch; the rescan
/// task stops with the cancellation token.
pub struct DirectoryFeed {
    _watcher: Option<RecommendedWatcher>,
    /// Rescan task handle.
    pub handle: tokio::task::JoinHandle<()>,
}

/// Watch `dir` and rescan it every `poll_interval`, sending candidate
/// paths to `tx`.
///
/// A watcher that cannot be created is logged and the feed runs on
/// rescans alone.
///
/// # Errors
///
/// Returns `AppError::Io` if `dir` cannot be created.
pub fn spawn_directory_feed(
    dir: PathBuf,
    poll_interval: Duration,
    tx: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
) -> Result<DirectoryFeed> {
    std::fs::create_dir_all(&dir)
        .map_err(|e| AppError::Io(format!("failed to create {}: {e}", dir.display())))?;

    let watcher = match start_watcher(&dir, tx.clone()) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(%err, dir = %dir.display(), "file watcher unavailable, relying on rescans");
            None
        }
    };

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(dir = %dir.display(), "directory feed shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    for path in scan(&dir).await {
                        if tx.send(path).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    Ok(DirectoryFeed {
        _watcher: watcher,
        handle,
    })
}

fn start_watcher(dir: &Path, tx: mpsc::Sender<PathBuf>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                for path in event.paths.into_iter().filter(|p| is_candidate(p)) {
                    // A full channel is fine: the next rescan finds the file.
                    if tx.try_send(path).is_err() {
                        debug!("directory feed channel busy, leaving file for rescan");
                    }
                }
            }
            Err(err) => warn!(%err, "directory watcher error"),
            _ => {}
        },
    )
    .map_err(|e| AppError::Io(format!("failed to create watcher: {e}")))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| AppError::Io(format!("failed to watch {}: {e}", dir.display())))?;
    info!(dir = %dir.display(), "directory watcher started");
    Ok(watcher)
}

/// Drain `rx` serially, handing each path to `handle`.
#[must_use]
pub fn spawn_consumer<F, Fut>(
    mut rx: mpsc::Receiver<PathBuf>,
    cancel: CancellationToken,
    handle: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(PathBuf) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            let path = tokio::select! {
                () = cancel.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(p) => p,
                    None => break,
                },
            };
            handle(path).await;
        }
    })
}
