//! Persistence for runtime-registered workers.
//!
//! Declared workers live in `config.toml`; workers added through the API
//! are stored here so they survive a restart.

use std::sync::Arc;

use crate::models::worker::WorkerSpec;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for registered worker records.
#[derive(Clone)]
pub struct WorkerRepo {
    db: Arc<Database>,
}

impl WorkerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a registered worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails (including a duplicate name).
    pub async fn insert(&self, spec: &WorkerSpec) -> Result<()> {
        let json = serde_json::to_string(spec)
            .map_err(|e| AppError::Db(format!("serialize worker: {e}")))?;
        let registered_at = spec.registered_at.unwrap_or_else(chrono::Utc::now);

        sqlx::query("INSERT INTO worker (name, spec, registered_at) VALUES (?1, ?2, ?3)")
            .bind(&spec.name)
            .bind(json)
            .bind(registered_at.to_rfc3339())
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// All registered workers in registration order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a stored record is corrupt.
    pub async fn list(&self) -> Result<Vec<WorkerSpec>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT spec FROM worker ORDER BY registered_at ASC")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter()
            .map(|(json,)| {
                serde_json::from_str(&json)
                    .map_err(|e| AppError::Db(format!("invalid worker record: {e}")))
            })
            .collect()
    }
}
