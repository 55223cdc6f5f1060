//! Domain model module declarations.

pub mod deliverable;
pub mod envelope;
pub mod health;
pub mod result;
pub mod task;
pub mod worker;
pub mod workflow;
