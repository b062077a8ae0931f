//! Common data models for LLM Serve
//!
//! This module defines the value objects exchanged between the request
//! router, the lifecycle manager and the inference engines.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f64 = 0.8;

/// Default nucleus sampling probability mass
pub const DEFAULT_TOP_P: f64 = 0.95;

/// Default maximum number of generated tokens
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Sampling parameters controlling randomness and length of generated output
///
/// A request override replaces the whole configuration; the fields are never
/// merged with the manager default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sampling temperature, must be >= 0
    pub temperature: f64,
    /// Nucleus sampling probability mass, must be within [0, 1]
    pub top_p: f64,
    /// Maximum number of tokens to generate, must be >= 1
    pub max_tokens: u32,
}

impl SamplingConfig {
    /// Creates a validated sampling configuration
    pub fn new(temperature: f64, top_p: f64, max_tokens: u32) -> Result<Self> {
        let config = Self {
            temperature,
            top_p,
            max_tokens,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "temperature must be a finite value >= 0, got {}",
                self.temperature
            )));
        }

        if !self.top_p.is_finite() || !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::InvalidParameter(format!(
                "top_p must be within [0, 1], got {}",
                self.top_p
            )));
        }

        if self.max_tokens < 1 {
            return Err(Error::InvalidParameter(
                "max_tokens must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// A single generation request handed to a lifecycle manager
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Prompt text, must not be empty
    pub prompt: String,
    /// Optional full replacement for the manager's default sampling config
    pub sampling: Option<SamplingConfig>,
}

impl GenerationRequest {
    /// Creates a request that uses the manager's default sampling config
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            sampling: None,
        }
    }

    /// Attaches a sampling override
    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = Some(sampling);
        self
    }

    /// Rejects empty prompts and out-of-range overrides
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidParameter("prompt must not be empty".to_string()));
        }

        if let Some(sampling) = &self.sampling {
            sampling.validate()?;
        }

        Ok(())
    }
}

/// Outcome of one successful generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    /// Generated text
    pub text: String,
    /// Number of tokens emitted by the engine
    pub tokens_generated: usize,
    /// Wall-clock time of the wake, generate and sleep bracket
    pub processing_time: Duration,
}

/// Power state of a loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Weights and caches are resident, the model can generate
    Awake,
    /// Heavy state is released, the model must be woken before use
    Asleep,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Awake => write!(f, "awake"),
            PowerState::Asleep => write!(f, "asleep"),
        }
    }
}

/// How much state the engine releases when put to sleep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SleepLevel {
    /// Level 1: offload weights to host memory, discard the KV cache
    #[default]
    Offload,
    /// Level 2: discard both weights and KV cache
    Discard,
}

impl SleepLevel {
    /// Numeric level understood by the engine
    pub fn as_u8(self) -> u8 {
        match self {
            SleepLevel::Offload => 1,
            SleepLevel::Discard => 2,
        }
    }
}

impl TryFrom<u8> for SleepLevel {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        match level {
            1 => Ok(SleepLevel::Offload),
            2 => Ok(SleepLevel::Discard),
            other => Err(format!("Unknown sleep level: {} (expected 1 or 2)", other)),
        }
    }
}

impl From<SleepLevel> for u8 {
    fn from(level: SleepLevel) -> Self {
        level.as_u8()
    }
}

impl FromStr for SleepLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "offload" => Ok(SleepLevel::Offload),
            "2" | "discard" => Ok(SleepLevel::Discard),
            _ => Err(format!("Unknown sleep level: {}", s)),
        }
    }
}

impl fmt::Display for SleepLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}
