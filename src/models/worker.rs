//! Declarative worker records.
//!
//! A worker is data, not code: a name, the routing keywords it answers to,
//! an optional health endpoint, and a queue-depth limit. Adding a worker at
//! runtime is an append to the roster, validated against a fixed schema.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

static WORKER_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]{1,31}$").ok());

fn default_max_pending() -> usize {
    25
}

fn default_true() -> bool {
    true
}

/// Where a roster entry came from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOrigin {
    /// Declared in `config.toml`.
    #[default]
    Declared,
    /// Registered at runtime through the API.
    Registered,
}

/// A single worker in the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerSpec {
    /// Unique worker identity; also its mailbox directory name.
    pub name: String,
    /// Ordinary routing keys, matched against `type` and `description`.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Status endpoint polled by the health monitor.
    #[serde(default)]
    pub health_url: Option<String>,
    /// Maximum unclaimed envelopes allowed in the worker's queue.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Disabled workers are never routed to and report `offline`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Free-text description, handed to the classifier as context.
    #[serde(default)]
    pub description: Option<String>,
    /// Roster provenance.
    #[serde(default)]
    pub origin: WorkerOrigin,
    /// Registration timestamp for runtime-added workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

impl WorkerSpec {
    /// Construct an enabled worker with default limits.
    #[must_use]
    pub fn new(name: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            name: name.into(),
            keywords,
            health_url: None,
            max_pending: default_max_pending(),
            enabled: true,
            description: None,
            origin: WorkerOrigin::Declared,
            registered_at: None,
        }
    }

    /// Lower-case the name and keywords and drop blank keywords.
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_lowercase();
        for keyword in &mut self.keywords {
            *keyword = keyword.trim().to_lowercase();
        }
        self.keywords.retain(|k| !k.is_empty());
    }
}

/// Validate a worker record against the roster schema.
///
/// # Errors
///
/// Returns `AppError::Validation` if the name is malformed, the queue limit
/// is zero, or the health URL is not an HTTP(S) URL.
pub fn validate_spec(spec: &WorkerSpec) -> Result<()> {
    let name_ok = WORKER_NAME
        .as_ref()
        .is_some_and(|re| re.is_match(&spec.name));
    if !name_ok {
        return Err(AppError::Validation(format!(
            "worker name {:?} must match ^[a-z][a-z0-9_-]{{1,31}}$",
            spec.name
        )));
    }

    if spec.max_pending == 0 {
        return Err(AppError::Validation(format!(
            "worker {} max_pending must be greater than zero",
            spec.name
        )));
    }

    if let Some(url) = &spec.health_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::Validation(format!(
                "worker {} health_url must be an http(s) URL",
                spec.name
            )));
        }
    }

    Ok(())
}
