//! Shared identifiers, error taxonomy, and configuration for the ospreydb
//! storage/concurrency core.

pub mod config;
pub mod error;
pub mod shutdown;
pub mod types;
