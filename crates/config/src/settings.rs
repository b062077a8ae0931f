//! Typed server settings
//!
//! These structures mirror the layout of the configuration file. Every field
//! has a default so a partial file only needs to name what it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{SamplingConfig, SleepLevel};
use inference_engine::{RemoteEngineOptions, SimulatedEngineOptions};

/// Root of the server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// HTTP listener
    pub server: HttpSettings,

    /// Log output
    pub logging: LoggingSettings,

    /// How long a caller waits for one generation, unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_timeout_secs: Option<u64>,

    /// Served models, in routing order
    pub models: Vec<ModelSettings>,
}

impl ServerSettings {
    /// Generation timeout as a duration
    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_secs.map(Duration::from_secs)
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,
}

impl HttpSettings {
    /// `host:port` pair suitable for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,

    /// Line format
    pub format: LogFormat,

    /// Daily rolling log file, in addition to stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Engine backing a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineSettings {
    /// In-process simulated engine
    Simulated(SimulatedEngineOptions),
    /// vLLM server driven over HTTP
    Remote(RemoteEngineOptions),
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::Simulated(SimulatedEngineOptions::default())
    }
}

/// One served model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Short name used in logs and `/health`
    pub name: String,

    /// Engine-level model identifier
    pub model_id: String,

    /// Name reported in responses, defaults to the last segment of `model_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Paths the model is reachable under, e.g. `/qwen`
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Default sampling configuration
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Sleep depth between requests
    #[serde(default)]
    pub sleep_level: SleepLevel,

    /// Engine backing the model
    #[serde(default)]
    pub engine: EngineSettings,
}

impl ModelSettings {
    /// Creates settings for a simulated model mounted at `/<name>`
    pub fn new(name: impl Into<String>, model_id: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            endpoints: vec![format!("/{}", name)],
            name,
            model_id: model_id.into(),
            display_name: None,
            sampling: SamplingConfig::default(),
            sleep_level: SleepLevel::default(),
            engine: EngineSettings::default(),
        }
    }

    /// Name reported to clients
    pub fn display_name(&self) -> &str {
        match &self.display_name {
            Some(name) => name,
            None => self
                .model_id
                .rsplit('/')
                .next()
                .unwrap_or(&self.model_id),
        }
    }
}
