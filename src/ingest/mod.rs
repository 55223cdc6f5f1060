//! Task and result intake: directory feeds, inbox files, store polling.

pub mod inbox;
pub mod poller;
pub mod watcher;
