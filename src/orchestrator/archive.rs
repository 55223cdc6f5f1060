//! Moving handled files out of watched directories.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::{AppError, Result};

/// What to do when the destination name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    /// Overwrite the older archive.
    Replace,
    /// Keep both by suffixing the new name with a timestamp.
    Suffix,
}

/// Move `src` into `dest_dir`, keeping its file name.
///
/// Falls back to copy-and-remove when a plain rename crosses filesystems.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created or the move fails.
pub async fn move_into(src: &Path, dest_dir: &Path, collision: Collision) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| AppError::Io(format!("no file name in {}", src.display())))?;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| AppError::Io(format!("failed to create {}: {e}", dest_dir.display())))?;

    let mut dest = dest_dir.join(name);
    if collision == Collision::Suffix && tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        dest = dest_dir.join(suffixed_name(src));
    }

    if tokio::fs::rename(src, &dest).await.is_err() {
        tokio::fs::copy(src, &dest).await.map_err(|e| {
            AppError::Io(format!(
                "failed to move {} to {}: {e}",
                src.display(),
                dest.display()
            ))
        })?;
        tokio::fs::remove_file(src)
            .await
            .map_err(|e| AppError::Io(format!("failed to remove {}: {e}", src.display())))?;
    }
    Ok(dest)
}

fn suffixed_name(src: &Path) -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f");
    let stem = src
        .file_stem()
        .map_or_else(|| "file".to_owned(), |s| s.to_string_lossy().into_owned());
    match src.extension() {
        Some(ext) => format!("{stem}-{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{stamp}"),
    }
}

/// Whether `path` was modified within `window` of now.
///
/// Files that fail to parse while still this fresh are probably mid-write.
pub async fn is_recent(path: &Path, window: std::time::Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| m.elapsed().ok())
        .is_some_and(|age| age < window)
}
