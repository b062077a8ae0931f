//! Built-in configuration defaults
//!
//! Out of the box the server hosts two chat models side by side on a
//! simulated engine, each mounted under its short name.

use crate::settings::{HttpSettings, LogFormat, LoggingSettings, ModelSettings, ServerSettings};

/// Default bind address
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 8000;

/// Default log filter
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Paths reserved by the router itself
pub const RESERVED_PATHS: [&str; 2] = ["/health", "/models"];

/// Models served when the configuration names none
pub fn default_models() -> Vec<ModelSettings> {
    let mut qwen = ModelSettings::new("qwen", "Qwen/Qwen2.5-7B-Instruct");
    qwen.display_name = Some("Qwen2.5-7B-Instruct".to_string());

    let mut llama = ModelSettings::new("llama", "unsloth/Meta-Llama-3.1-8B-Instruct");
    llama.display_name = Some("Llama-3.1-8B-Instruct".to_string());

    vec![qwen, llama]
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            server: HttpSettings::default(),
            logging: LoggingSettings::default(),
            generation_timeout_secs: None,
            models: default_models(),
        }
    }
}
