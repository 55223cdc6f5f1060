//! Task orchestration modules.
//!
//! Covers the per-task pipeline, mailbox dispatch, lifecycle writes,
//! outbox reconciliation, and onward notification.

pub mod archive;
pub mod deliverable;
pub mod dispatcher;
pub mod mailbox;
pub mod notifier;
pub mod pipeline;
pub mod reconciler;
pub mod status_sync;
