//! Lifecycle write-back allow-list.
//!
//! Every write to the durable store, whether from the status synchronizer
//! or from the `/api/writeback` endpoint, names a table and the fields it
//! touches. Anything outside the configured allow-list is rejected with a
//! descriptive error and never silently narrowed.

use std::collections::BTreeMap;

use tracing::{info_span, warn};

use crate::config::WriteBackConfig;
use crate::{AppError, Result};

/// Table holding task records.
pub const TASKS_TABLE: &str = "tasks";

/// Compiled allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBackPolicy {
    allow: BTreeMap<String, Vec<String>>,
}

impl WriteBackPolicy {
    /// Build from configuration, lower-casing table and field names.
    #[must_use]
    pub fn from_config(config: &WriteBackConfig) -> Self {
        let allow = config
            .allow
            .iter()
            .map(|(table, fields)| {
                (
                    table.trim().to_lowercase(),
                    fields.iter().map(|f| f.trim().to_lowercase()).collect(),
                )
            })
            .collect();
        Self { allow }
    }

    /// Check that every `field` of `table` is writable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::WriteDenied` naming the first disallowed target.
    pub fn check<S: AsRef<str>>(&self, table: &str, fields: &[S]) -> Result<()> {
        let _span = info_span!("writeback_check", table = %table).entered();
        let table_key = table.trim().to_lowercase();

        let Some(allowed) = self.allow.get(&table_key) else {
            warn!(table = %table, "write-back to table outside allow-list rejected");
            return Err(AppError::WriteDenied(format!(
                "table {table:?} is not writable; allowed tables: {}",
                self.allowed_tables().join(", ")
            )));
        };

        if fields.is_empty() {
            return Err(AppError::Validation("write-back names no fields".into()));
        }

        for field in fields {
            let field = field.as_ref().trim().to_lowercase();
            if !allowed.contains(&field) {
                warn!(table = %table, field = %field, "write-back to field outside allow-list rejected");
                return Err(AppError::WriteDenied(format!(
                    "field {field:?} of table {table:?} is not writable; allowed fields: {}",
                    allowed.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Tables with at least one writable field.
    #[must_use]
    pub fn allowed_tables(&self) -> Vec<&str> {
        self.allow.keys().map(String::as_str).collect()
    }
}
