//! Runtime-extensible worker roster.
//!
//! The registry is the single source of the routing table: ordinary routes
//! are derived from each enabled worker's keywords in declaration order,
//! and the escalation rule comes from the `[routing]` section. Declared
//! workers are replaced on config hot-reload; registered workers survive it.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::info;

use crate::config::{validate_roster, GlobalConfig, RoutingConfig};
use crate::models::worker::{validate_spec, WorkerOrigin, WorkerSpec};
use crate::{AppError, Result};

use super::router::RoutingTable;

/// Registry shared between the pipeline, the API, and the config watcher.
pub type SharedRegistry = Arc<RwLock<WorkerRegistry>>;

/// Acquire a read guard, recovering from a poisoned lock.
pub fn read_registry(registry: &SharedRegistry) -> RwLockReadGuard<'_, WorkerRegistry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

/// Acquire a write guard, recovering from a poisoned lock.
pub fn write_registry(registry: &SharedRegistry) -> RwLockWriteGuard<'_, WorkerRegistry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

/// The worker roster plus escalation rule.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    routing: RoutingConfig,
    workers: Vec<WorkerSpec>,
    max_workers: usize,
}

impl WorkerRegistry {
    /// Build and validate a registry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the roster fails validation.
    pub fn new(
        mut routing: RoutingConfig,
        mut workers: Vec<WorkerSpec>,
        max_workers: usize,
    ) -> Result<Self> {
        validate_roster(&mut workers, &mut routing, max_workers)?;
        Ok(Self {
            routing,
            workers,
            max_workers,
        })
    }

    /// Build from an already-validated configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            routing: config.routing.clone(),
            workers: config.workers.clone(),
            max_workers: config.max_workers,
        }
    }

    /// Wrap into the shared handle.
    #[must_use]
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Routing section currently in force.
    #[must_use]
    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Every roster entry, in declaration order.
    #[must_use]
    pub fn workers(&self) -> &[WorkerSpec] {
        &self.workers
    }

    /// Enabled roster entries.
    pub fn enabled(&self) -> impl Iterator<Item = &WorkerSpec> {
        self.workers.iter().filter(|w| w.enabled)
    }

    /// Look up a worker by name, case-insensitive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WorkerSpec> {
        let name = name.trim().to_lowercase();
        self.workers.iter().find(|w| w.name == name)
    }

    /// Names of every enabled worker: the classifier's output vocabulary.
    #[must_use]
    pub fn vocabulary(&self) -> Vec<String> {
        self.enabled().map(|w| w.name.clone()).collect()
    }

    /// Derive the routing table from the enabled roster.
    #[must_use]
    pub fn routing_table(&self) -> RoutingTable {
        let escalation_enabled = self
            .get(&self.routing.escalation_worker)
            .is_some_and(|w| w.enabled);

        let mut table = RoutingTable {
            escalation_worker: if escalation_enabled {
                self.routing.escalation_worker.clone()
            } else {
                String::new()
            },
            escalation_keywords: self.routing.escalation_keywords.clone(),
            routes: Vec::new(),
            workers: Vec::new(),
        };

        for worker in self.enabled() {
            if worker.name == self.routing.escalation_worker {
                continue;
            }
            table.workers.push(worker.name.clone());
            for keyword in &worker.keywords {
                table.routes.push((keyword.clone(), worker.name.clone()));
            }
        }

        table
    }

    /// Append a worker at runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the record is malformed, the name is
    /// taken, or the roster is at capacity.
    pub fn register(&mut self, mut spec: WorkerSpec) -> Result<WorkerSpec> {
        spec.normalize();
        validate_spec(&spec)?;

        if self.get(&spec.name).is_some() {
            return Err(AppError::Validation(format!(
                "worker {} already exists",
                spec.name
            )));
        }

        if self.workers.len() >= self.max_workers {
            return Err(AppError::Validation(format!(
                "worker roster is at capacity ({})",
                self.max_workers
            )));
        }

        spec.origin = WorkerOrigin::Registered;
        spec.registered_at = Some(Utc::now());
        self.workers.push(spec.clone());
        info!(worker = %spec.name, "worker registered");
        Ok(spec)
    }

    /// Drop a runtime-registered worker. Declared workers are kept.
    pub fn remove_registered(&mut self, name: &str) -> bool {
        let before = self.workers.len();
        self.workers
            .retain(|w| !(w.origin == WorkerOrigin::Registered && w.name == name));
        self.workers.len() != before
    }

    /// Replace declared workers and the routing section after a config
    /// change, keeping runtime-registered workers appended after them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the merged roster fails validation; the
    /// registry is left unchanged in that case.
    pub fn reload_declared(
        &mut self,
        declared: Vec<WorkerSpec>,
        routing: RoutingConfig,
    ) -> Result<()> {
        let mut merged: Vec<WorkerSpec> = declared;
        let declared_names: Vec<String> = merged
            .iter()
            .map(|w| w.name.trim().to_lowercase())
            .collect();
        merged.extend(
            self.workers
                .iter()
                .filter(|w| w.origin == WorkerOrigin::Registered)
                .filter(|w| !declared_names.contains(&w.name))
                .cloned(),
        );

        let candidate = Self::new(routing, merged, self.max_workers)?;
        *self = candidate;
        info!(workers = self.workers.len(), "worker roster reloaded");
        Ok(())
    }
}
