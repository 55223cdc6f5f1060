//! Persistence layer modules.

pub mod db;
pub mod retention;
pub mod schema;
pub mod task_repo;
pub mod worker_repo;
pub mod workflow_repo;
