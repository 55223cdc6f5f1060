//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// No routing strategy produced a worker for a task.
    Routing(String),
    /// Inference call (classification or decomposition) failed or timed out.
    Llm(String),
    /// Decomposer output was not a well-formed subtask list.
    Decomposition(String),
    /// Mailbox write or dispatch precondition failure.
    Dispatch(String),
    /// Result record could not be reconciled.
    Reconcile(String),
    /// Worker health probing failure.
    Health(String),
    /// Write outside the lifecycle write-back allow-list.
    WriteDenied(String),
    /// Lifecycle transition not permitted by the task state machine.
    InvalidTransition(String),
    /// Input failed schema or value validation.
    Validation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Required credential for an external dependency is missing.
    Credentials(String),
    /// Outbound HTTP failure.
    Http(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Routing(msg) => write!(f, "routing: {msg}"),
            Self::Llm(msg) => write!(f, "llm: {msg}"),
            Self::Decomposition(msg) => write!(f, "decomposition: {msg}"),
            Self::Dispatch(msg) => write!(f, "dispatch: {msg}"),
            Self::Reconcile(msg) => write!(f, "reconcile: {msg}"),
            Self::Health(msg) => write!(f, "health: {msg}"),
            Self::WriteDenied(msg) => write!(f, "write denied: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Credentials(msg) => write!(f, "credentials: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
