//! Error types for the common crate
//!
//! This module defines the error taxonomy shared by the lifecycle manager,
//! the request router and the deployment config applier.

use thiserror::Error;

/// Result type for LLM Serve operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to errors raised by collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Common error type for LLM Serve operations
#[derive(Error, Debug)]
pub enum Error {
    /// The model resource failed to load; terminal for that manager
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Caller-supplied prompt or sampling parameter is out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The generation step failed after the model was woken
    #[error("Generation failed for model {model}: {source}")]
    Generation {
        /// Model the generation was attempted on
        model: String,
        /// Underlying engine failure
        #[source]
        source: BoxError,
    },

    /// Deployment config or control-plane address is malformed
    #[error("Config validation error: {0}")]
    ConfigValidation(String),

    /// Network or control-plane failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps an engine failure as a generation error for `model`
    pub fn generation(model: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Generation {
            model: model.into(),
            source: source.into(),
        }
    }

    /// Returns true if the error is caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidParameter(_) | Error::ConfigValidation(_))
    }

    /// Returns true if the error is an initialization error
    pub fn is_initialization(&self) -> bool {
        matches!(self, Error::Initialization(_))
    }

    /// Returns true if the error is a generation error
    pub fn is_generation(&self) -> bool {
        matches!(self, Error::Generation { .. })
    }

    /// Returns true if the error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Initialization(_) => "initialization_error",
            Error::InvalidParameter(_) => "invalid_parameter",
            Error::Generation { .. } => "generation_error",
            Error::ConfigValidation(_) => "config_validation_error",
            Error::Transport(_) => "transport_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Config(_) => "configuration_error",
            Error::Timeout(_) => "timeout",
            Error::Internal(_) => "internal_error",
        }
    }
}
