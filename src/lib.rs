#![forbid(unsafe_code)]

//! Task routing, dispatch, and lifecycle reconciliation for a fleet of
//! file-driven worker agents.

pub mod api;
pub mod config;
pub mod config_watcher;
pub mod errors;
pub mod health;
pub mod ingest;
pub mod journal;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod policy;
pub mod routing;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
