//! Per-worker file mailboxes.
//!
//! Each worker owns `<root>/<worker>/queue/`. Every dispatch lands there as
//! its own file named `<utc-timestamp>-<dispatch_id>.json`, so concurrent
//! dispatches to the same worker never touch the same path. Files are
//! written to a hidden temporary in the same directory and renamed into
//! place, which means a reader never observes a partial envelope.
//!
//! Workers claim work by moving the oldest queue file into
//! `<root>/<worker>/claimed/`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::models::envelope::MailboxEnvelope;
use crate::{AppError, Result};

/// Directory holding undelivered envelopes.
pub const QUEUE_DIR: &str = "queue";
/// Directory holding envelopes a worker has taken.
pub const CLAIMED_DIR: &str = "claimed";

/// File-backed mailbox root.
#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    /// Create a mailbox rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Mailbox root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Queue directory for `worker`.
    #[must_use]
    pub fn queue_dir(&self, worker: &str) -> PathBuf {
        self.root.join(worker).join(QUEUE_DIR)
    }

    /// Claimed directory for `worker`.
    #[must_use]
    pub fn claimed_dir(&self, worker: &str) -> PathBuf {
        self.root.join(worker).join(CLAIMED_DIR)
    }

    /// Write an envelope into `worker`'s queue and return its path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dispatch` if the queue directory cannot be created
    /// or the file cannot be written and renamed into place.
    pub async fn deliver(&self, worker: &str, envelope: &MailboxEnvelope) -> Result<PathBuf> {
        let dir = self.queue_dir(worker);
        let body = serde_json::to_vec_pretty(envelope)
            .map_err(|e| AppError::Dispatch(format!("failed to encode envelope: {e}")))?;
        let file_name = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
            envelope.dispatch_id
        );

        let path = tokio::task::spawn_blocking(move || write_atomic(&dir, &file_name, &body, false))
            .await
            .map_err(|e| AppError::Dispatch(format!("mailbox writer task failed: {e}")))??;

        debug!(worker, path = %path.display(), "envelope delivered");
        Ok(path)
    }

    /// Queue files for `worker`, oldest first.
    ///
    /// A worker that has never received work has an empty queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the queue directory exists but cannot be read.
    pub async fn pending(&self, worker: &str) -> Result<Vec<PathBuf>> {
        let dir = self.queue_dir(worker);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Io(format!(
                    "failed to read queue {}: {e}",
                    dir.display()
                )))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Io(format!("failed to read queue entry: {e}")))?
        {
            let path = entry.path();
            if is_envelope_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Number of envelopes waiting in `worker`'s queue.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Mailbox::pending`].
    pub async fn pending_count(&self, worker: &str) -> Result<usize> {
        Ok(self.pending(worker).await?.len())
    }

    /// Move the oldest queued envelope into `claimed/` and return it.
    ///
    /// If another claimant wins the race for a file, the next one is tried.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on read failures, or `AppError::Dispatch` if a
    /// claimed file does not hold a valid envelope.
    pub async fn claim_next(&self, worker: &str) -> Result<Option<(PathBuf, MailboxEnvelope)>> {
        let claimed = self.claimed_dir(worker);
        tokio::fs::create_dir_all(&claimed).await.map_err(|e| {
            AppError::Io(format!("failed to create {}: {e}", claimed.display()))
        })?;

        for path in self.pending(worker).await? {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = claimed.join(name);
            match tokio::fs::rename(&path, &target).await {
                Ok(()) => {
                    let raw = tokio::fs::read(&target).await.map_err(|e| {
                        AppError::Io(format!("failed to read {}: {e}", target.display()))
                    })?;
                    let envelope = serde_json::from_slice(&raw).map_err(|e| {
                        AppError::Dispatch(format!("invalid envelope {}: {e}", target.display()))
                    })?;
                    return Ok(Some((target, envelope)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AppError::Io(format!(
                        "failed to claim {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(None)
    }
}

fn is_envelope_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn write_atomic(dir: &Path, file_name: &str, body: &[u8], overwrite: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::Dispatch(format!("failed to create {}: {e}", dir.display())))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".dispatch-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| AppError::Dispatch(format!("failed to create temp file: {e}")))?;
    tmp.write_all(body)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| AppError::Dispatch(format!("failed to write envelope: {e}")))?;

    let path = dir.join(file_name);
    let persisted = if overwrite {
        tmp.persist(&path)
    } else {
        tmp.persist_noclobber(&path)
    };
    persisted
        .map_err(|e| AppError::Dispatch(format!("failed to publish {}: {}", path.display(), e.error)))?;
    Ok(path)
}

/// Write `body` to `dir/file_name` through a same-directory temporary.
///
/// Fails if `file_name` already exists.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory, temporary, or rename fails.
pub async fn publish_file(dir: PathBuf, file_name: String, body: Vec<u8>) -> Result<PathBuf> {
    write_in_background(dir, file_name, body, false).await
}

/// Like [`publish_file`], but atomically replaces an existing file.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory, temporary, or rename fails.
pub async fn replace_file(dir: PathBuf, file_name: String, body: Vec<u8>) -> Result<PathBuf> {
    write_in_background(dir, file_name, body, true).await
}

async fn write_in_background(
    dir: PathBuf,
    file_name: String,
    body: Vec<u8>,
    overwrite: bool,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || write_atomic(&dir, &file_name, &body, overwrite))
        .await
        .map_err(|e| AppError::Io(format!("file writer task failed: {e}")))?
        .map_err(|e| AppError::Io(e.to_string()))
}
