//! Layered configuration loader
//!
//! Sources are merged in order, later ones winning:
//! built-in defaults, the configuration file (TOML or YAML, chosen by
//! extension) and `LLM_SERVE__*` environment variables, where a double
//! underscore separates nested keys (`LLM_SERVE__SERVER__PORT=9000`).

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use common::error::{Error, Result};

use crate::settings::ServerSettings;
use crate::validation::ConfigValidator;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "LLM_SERVE";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

fn config_error(e: ConfigError) -> Error {
    Error::Config(e.to_string())
}

/// Merged and validated server configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// Raw merged configuration, for ad-hoc lookups
    config: Config,

    /// Typed view of the merged configuration
    settings: ServerSettings,

    /// File the configuration was read from, if any
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Loads defaults, the optional file at `path` and the process environment
    pub fn new(path: Option<&Path>) -> Result<Self> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);

        Self::load(path, environment)
    }

    /// Wraps already built settings without reading any source
    pub fn from_settings(settings: ServerSettings) -> Result<Self> {
        ConfigValidator::validate(&settings)?;
        let config = Config::try_from(&settings).map_err(config_error)?;

        Ok(Self {
            config,
            settings,
            source_path: None,
        })
    }

    fn load(path: Option<&Path>, environment: Environment) -> Result<Self> {
        let defaults = Config::try_from(&ServerSettings::default()).map_err(config_error)?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(environment)
            .build()
            .map_err(config_error)?;

        let settings: ServerSettings = config.clone().try_deserialize().map_err(config_error)?;
        ConfigValidator::validate(&settings)?;

        debug!(
            "Configuration loaded with {} model(s) on {}",
            settings.models.len(),
            settings.server.bind_address()
        );

        Ok(Self {
            config,
            settings,
            source_path: path.map(Path::to_path_buf),
        })
    }

    /// Typed settings
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// File the configuration was read from
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Looks up a single value by dotted key, e.g. `server.port`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config.get::<T>(key).map_err(config_error)
    }

    /// Looks up a string value by dotted key
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.config.get_string(key).map_err(config_error)
    }

    /// Looks up a port-sized value by dotted key
    pub fn get_u16(&self, key: &str) -> Result<u16> {
        self.get::<u16>(key)
    }
}
