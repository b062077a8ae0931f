//! Configuration management for LLM Serve
//!
//! This crate provides the typed server settings and the layered loader that
//! merges built-in defaults, an optional configuration file and environment
//! variables.

pub mod defaults;
pub mod manager;
pub mod settings;
pub mod validation;

// Re-export commonly used types
pub use manager::ConfigManager;
pub use settings::{
    EngineSettings, HttpSettings, LogFormat, LoggingSettings, ModelSettings, ServerSettings,
};
pub use validation::ConfigValidator;
