//! Global configuration parsing, validation, and credential loading.

use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::models::worker::{validate_spec, WorkerSpec};
use crate::{AppError, Result};

/// Keychain service name used for credential lookup.
pub const KEYRING_SERVICE: &str = "agent-switchboard";

/// Escalation routing configuration.
///
/// Escalation keywords take priority over every ordinary route, so a
/// "security audit of an order document" never lands on the document worker.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RoutingConfig {
    /// Worker reserved for tasks that need advanced reasoning.
    pub escalation_worker: String,
    /// Keywords that force escalation when found in `type` or `description`.
    #[serde(default)]
    pub escalation_keywords: Vec<String>,
    /// Unroutable tasks with a description longer than this are offered to
    /// the decomposer as likely multi-step requests.
    #[serde(default = "default_decompose_min_length")]
    pub decompose_min_length: usize,
}

fn default_decompose_min_length() -> usize {
    100
}

/// Inference endpoint used for classification and decomposition.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClassifierConfig {
    /// Whether the inference fallbacks are enabled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// OpenAI-compatible chat completions URL.
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    /// Model identifier sent with every request.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Hard timeout for a single call.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    /// API key (populated at runtime from keychain or environment).
    #[serde(skip)]
    pub api_key: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_seconds: default_llm_timeout(),
            api_key: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_llm_timeout() -> u64 {
    30
}

/// Worker health polling configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Seconds between polling cycles.
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u64,
    /// Per-call timeout.
    #[serde(default = "default_health_timeout")]
    pub timeout_seconds: u64,
    /// Age after which a worker's self-reported timestamp is considered stale.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    /// Snapshot file path; defaults to `<data_dir>/health.json`.
    #[serde(default)]
    pub snapshot_file: Option<PathBuf>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval(),
            timeout_seconds: default_health_timeout(),
            stale_after_seconds: default_stale_after(),
            snapshot_file: None,
        }
    }
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

fn default_stale_after() -> u64 {
    300
}

/// Lifecycle write-back allow-list: table name to mutable fields.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WriteBackConfig {
    /// Allowed `(table, fields)` pairs.
    #[serde(default = "default_writeback_allow")]
    pub allow: BTreeMap<String, Vec<String>>,
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            allow: default_writeback_allow(),
        }
    }
}

fn default_writeback_allow() -> BTreeMap<String, Vec<String>> {
    let mut allow = BTreeMap::new();
    allow.insert(
        "tasks".to_owned(),
        vec![
            "status".to_owned(),
            "priority".to_owned(),
            "assigned_to".to_owned(),
            "updates".to_owned(),
        ],
    );
    allow
}

/// Onward delivery of reconciled results to a chat surface.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotifyConfig {
    /// Webhook receiving JSON notifications; log-only when absent.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_http_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_http_port() -> u16 {
    8787
}

fn default_poll_interval() -> u64 {
    15
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_workers() -> usize {
    32
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the database, journal, and health snapshot.
    pub data_dir: PathBuf,
    /// Shared drop directory for incoming task files.
    pub inbox_dir: PathBuf,
    /// Result directories written by workers; the first also receives
    /// unroutable error records.
    pub outbox_dirs: Vec<PathBuf>,
    /// Archive for handled inbox and outbox files.
    pub processed_dir: PathBuf,
    /// Root of the per-worker mailbox queues.
    pub mailbox_root: PathBuf,
    /// Interface the webhook and health API bind to.
    #[serde(default = "default_http_host")]
    pub http_host: String,
    /// HTTP port for the webhook and health API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Backup rescan and durable-store poll interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Days before terminal tasks and archived files are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Capacity ceiling for the worker roster.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Escalation and decomposition thresholds.
    pub routing: RoutingConfig,
    /// Declarative worker roster, in routing declaration order.
    #[serde(default, rename = "worker")]
    pub workers: Vec<WorkerSpec>,
    /// Inference fallback settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Health monitor settings.
    #[serde(default)]
    pub health: HealthConfig,
    /// Lifecycle write-back allow-list.
    #[serde(default)]
    pub writeback: WriteBackConfig,
    /// Chat-surface notification settings.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize the roster.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the inference API key from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Credentials` if neither source provides a key.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.classifier.api_key = load_credential("llm_api_key", "SWITCHBOARD_LLM_API_KEY").await?;
        Ok(())
    }

    /// Path of the `SQLite` database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("switchboard.db")
    }

    /// Directory for the routing decision journal.
    #[must_use]
    pub fn journal_dir(&self) -> PathBuf {
        self.data_dir.join("journal")
    }

    /// Path of the aggregated health snapshot file.
    #[must_use]
    pub fn health_snapshot_path(&self) -> PathBuf {
        self.health
            .snapshot_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("health.json"))
    }

    /// Outbox directory that receives unroutable error records.
    #[must_use]
    pub fn primary_outbox(&self) -> &Path {
        // validate() guarantees at least one entry.
        self.outbox_dirs
            .first()
            .map_or(self.processed_dir.as_path(), PathBuf::as_path)
    }

    /// Create every directory the server reads from or writes to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any directory cannot be created.
    pub fn ensure_directories(&self) -> Result<()> {
        let mut dirs = vec![
            self.data_dir.clone(),
            self.inbox_dir.clone(),
            self.processed_dir.clone(),
            self.mailbox_root.clone(),
        ];
        dirs.extend(self.outbox_dirs.iter().cloned());
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|err| {
                AppError::Config(format!("failed to create {}: {err}", dir.display()))
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.outbox_dirs.is_empty() {
            return Err(AppError::Config("outbox_dirs must not be empty".into()));
        }

        if self.max_workers == 0 {
            return Err(AppError::Config(
                "max_workers must be greater than zero".into(),
            ));
        }

        if self.poll_interval_seconds == 0 || self.health.interval_seconds == 0 {
            return Err(AppError::Config(
                "polling intervals must be greater than zero".into(),
            ));
        }

        validate_roster(&mut self.workers, &mut self.routing, self.max_workers)
    }
}

/// Validate and normalize a worker roster against the routing section.
///
/// Lower-cases keywords and worker names, rejects duplicates, enforces the
/// capacity ceiling, and requires the escalation worker to be declared.
pub(crate) fn validate_roster(
    workers: &mut [WorkerSpec],
    routing: &mut RoutingConfig,
    max_workers: usize,
) -> Result<()> {
    if workers.len() > max_workers {
        return Err(AppError::Config(format!(
            "{} workers declared but max_workers is {max_workers}",
            workers.len()
        )));
    }

    let mut seen = HashSet::new();
    for spec in workers.iter_mut() {
        spec.normalize();
        validate_spec(spec).map_err(|err| AppError::Config(err.to_string()))?;
        if !seen.insert(spec.name.clone()) {
            return Err(AppError::Config(format!(
                "duplicate worker name: {}",
                spec.name
            )));
        }
    }

    routing.escalation_worker = routing.escalation_worker.trim().to_lowercase();
    for keyword in &mut routing.escalation_keywords {
        *keyword = keyword.trim().to_lowercase();
    }
    routing.escalation_keywords.retain(|k| !k.is_empty());

    if !seen.contains(&routing.escalation_worker) {
        return Err(AppError::Config(format!(
            "escalation_worker {} is not a declared worker",
            routing.escalation_worker
        )));
    }

    Ok(())
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Credentials(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Credentials(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
