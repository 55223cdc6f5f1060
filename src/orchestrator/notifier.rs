//! Onward delivery of finished results to the originating conversation.
//!
//! Reads [`Notification`]s from an `mpsc` channel. With a webhook
//! configured each one is POSTed as JSON; otherwise the delivery is only
//! logged. Failures are logged and never retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::deliverable::Deliverable;
use crate::models::task::UpdateStatus;

/// A result ready to be surfaced to the user who asked for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Conversation the task came from.
    pub conversation_id: String,
    /// Requesting user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Durable task id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Worker that produced the result.
    pub agent: String,
    /// Outcome.
    pub status: UpdateStatus,
    /// Short human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Attached artifact or text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable: Option<Deliverable>,
}

/// Spawn a background task that forwards notifications.
///
/// Runs until the token fires or the channel closes.
#[must_use]
pub fn spawn_notifier(
    mut rx: mpsc::Receiver<Notification>,
    webhook_url: Option<String>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        loop {
            let note = tokio::select! {
                () = cancel.cancelled() => {
                    info!("notifier shutting down");
                    break;
                }
                maybe = rx.recv() => {
                    if let Some(n) = maybe { n } else {
                        info!("notification channel closed");
                        break;
                    }
                }
            };

            let Some(url) = webhook_url.as_deref() else {
                info!(
                    conversation_id = %note.conversation_id,
                    agent = %note.agent,
                    task_id = note.task_id.as_deref().unwrap_or("-"),
                    "result ready for conversation"
                );
                continue;
            };

            match client.post(url).json(&note).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(conversation_id = %note.conversation_id, "notification delivered");
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), conversation_id = %note.conversation_id, "notification rejected");
                }
                Err(err) => {
                    warn!(%err, conversation_id = %note.conversation_id, "notification delivery failed");
                }
            }
        }
    })
}
