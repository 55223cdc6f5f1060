//! Artifact metadata attached to task updates.

use serde::{Deserialize, Serialize};

/// Coarse artifact category derived from the file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableKind {
    /// Portable document format.
    Pdf,
    /// Audio recording.
    Audio,
    /// Video recording.
    Video,
    /// Still image.
    Image,
    /// Office or text document.
    Document,
    /// Anything else on disk.
    File,
    /// Inline text synthesized from the result payload.
    Text,
}

/// Metadata describing a worker-produced artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deliverable {
    /// Artifact category.
    pub kind: DeliverableKind,
    /// Path or other locator; absent for inline text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// MIME content type.
    pub content_type: String,
    /// File size, when the artifact is a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Bounded text preview, for inline text deliverables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}
