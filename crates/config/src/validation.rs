//! Configuration validation
//!
//! Catches settings that would otherwise surface as routing conflicts or
//! generation failures only after the server is up.

use std::collections::HashSet;

use common::error::{Error, Result};

use crate::defaults::RESERVED_PATHS;
use crate::settings::{EngineSettings, ServerSettings};

/// Validates server settings
pub struct ConfigValidator;

impl ConfigValidator {
    /// Checks the settings as a whole; the first problem found is returned
    pub fn validate(settings: &ServerSettings) -> Result<()> {
        if settings.server.host.trim().is_empty() {
            return Err(Error::Config("server.host must not be empty".to_string()));
        }

        if settings.generation_timeout_secs == Some(0) {
            return Err(Error::Config(
                "generation_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if settings.models.is_empty() {
            return Err(Error::Config("at least one model must be configured".to_string()));
        }

        let mut names = HashSet::new();
        let mut endpoints = HashSet::new();

        for model in &settings.models {
            if model.name.trim().is_empty() {
                return Err(Error::Config("model name must not be empty".to_string()));
            }

            if !names.insert(model.name.as_str()) {
                return Err(Error::Config(format!("duplicate model name '{}'", model.name)));
            }

            if model.model_id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "model '{}' has an empty model_id",
                    model.name
                )));
            }

            if model.endpoints.is_empty() {
                return Err(Error::Config(format!(
                    "model '{}' has no endpoints",
                    model.name
                )));
            }

            for endpoint in &model.endpoints {
                if !endpoint.starts_with('/') || endpoint.len() < 2 {
                    return Err(Error::Config(format!(
                        "endpoint '{}' of model '{}' must start with '/' and name a path",
                        endpoint, model.name
                    )));
                }

                if RESERVED_PATHS.contains(&endpoint.as_str()) {
                    return Err(Error::Config(format!(
                        "endpoint '{}' of model '{}' is reserved",
                        endpoint, model.name
                    )));
                }

                if !endpoints.insert(endpoint.as_str()) {
                    return Err(Error::Config(format!(
                        "endpoint '{}' is mapped to more than one model",
                        endpoint
                    )));
                }
            }

            model.sampling.validate().map_err(|e| {
                Error::Config(format!("model '{}' default sampling: {}", model.name, e))
            })?;

            if let EngineSettings::Remote(options) = &model.engine {
                if !options.base_url.starts_with("http://")
                    && !options.base_url.starts_with("https://")
                {
                    return Err(Error::Config(format!(
                        "model '{}' engine base_url must be an http(s) URL, got '{}'",
                        model.name, options.base_url
                    )));
                }
            }
        }

        Ok(())
    }
}
