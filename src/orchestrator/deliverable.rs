//! Deliverable detection for worker results.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::deliverable::{Deliverable, DeliverableKind};
use crate::models::result::ResultRecord;

/// Characters kept from inline text results.
pub const TEXT_PREVIEW_CHARS: usize = 500;

const AUDIO: &[&str] = &["mp3", "wav", "ogg", "oga", "m4a", "flac", "aac", "opus"];
const VIDEO: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];
const IMAGE: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff"];
const DOCUMENT: &[&str] = &[
    "doc", "docx", "odt", "rtf", "txt", "md", "html", "htm", "csv", "xls", "xlsx", "ods",
    "ppt", "pptx", "odp", "json",
];

/// Fields checked, in order, for inline text in an object result.
const TEXT_FIELDS: &[&str] = &["text", "content", "summary", "message", "output"];

/// Classify a file by extension.
#[must_use]
pub fn classify_extension(path: &Path) -> DeliverableKind {
    let Some(ext) = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
    else {
        return DeliverableKind::File;
    };
    let ext = ext.as_str();

    if ext == "pdf" {
        DeliverableKind::Pdf
    } else if AUDIO.contains(&ext) {
        DeliverableKind::Audio
    } else if VIDEO.contains(&ext) {
        DeliverableKind::Video
    } else if IMAGE.contains(&ext) {
        DeliverableKind::Image
    } else if DOCUMENT.contains(&ext) {
        DeliverableKind::Document
    } else {
        DeliverableKind::File
    }
}

/// Find the deliverable for a result, if any.
///
/// A named artifact wins when it can be opened. Relative paths resolve
/// against `base_dir`. An unreadable artifact is skipped and inline text
/// is tried instead.
pub async fn detect(record: &ResultRecord, base_dir: &Path) -> Option<Deliverable> {
    if let Some(raw) = record.artifact_path() {
        let path = resolve(raw, base_dir);
        match file_deliverable(&path).await {
            Ok(deliverable) => return Some(deliverable),
            Err(err) => {
                warn!(path = %path.display(), %err, "artifact not readable, omitting file deliverable");
            }
        }
    }

    let text = inline_text(&record.result)?;
    debug!(chars = text.chars().count(), "synthesizing text deliverable");
    Some(Deliverable {
        kind: DeliverableKind::Text,
        locator: None,
        content_type: "text/plain".to_owned(),
        size_bytes: u64::try_from(text.len()).ok(),
        preview: Some(text.chars().take(TEXT_PREVIEW_CHARS).collect()),
    })
}

fn resolve(raw: &str, base_dir: &Path) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

async fn file_deliverable(path: &Path) -> std::io::Result<Deliverable> {
    let file = tokio::fs::File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }

    Ok(Deliverable {
        kind: classify_extension(path),
        locator: Some(path.display().to_string()),
        content_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned(),
        size_bytes: Some(meta.len()),
        preview: None,
    })
}

/// Inline text carried by a result value.
#[must_use]
pub fn inline_text(result: &Value) -> Option<&str> {
    let text = match result {
        Value::String(s) => s.as_str(),
        Value::Object(map) => TEXT_FIELDS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))?,
        _ => return None,
    };
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
