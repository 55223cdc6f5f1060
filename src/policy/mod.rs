//! Write-access policy for the durable task store.

pub mod writeback;
