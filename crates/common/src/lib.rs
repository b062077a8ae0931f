//! Common utilities and types for LLM Serve
//!
//! This crate provides shared functionality used across the workspace:
//! the error taxonomy, the generation value objects and a few utilities.

pub mod error;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use error::{BoxError, Error, Result};
pub use models::*;
