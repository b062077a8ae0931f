//! Logging for LLM Serve
//!
//! This crate installs the global `tracing` subscriber for the server and
//! the deployment tool.

pub mod logger;

// Re-export commonly used types
pub use logger::{init, init_cli, LogGuard};
