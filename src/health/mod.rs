//! Worker fleet health monitoring.

pub mod monitor;
