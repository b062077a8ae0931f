//! Main integration module for LLM Serve
//!
//! This module wires configuration, engines, lifecycle managers and the
//! HTTP router together and provides the entry point of the server binary.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use tracing::{info, warn};

use api_gateway::{ApiServer, ModelBinding};
use inference_engine::{InferenceEngine, RemoteEngine, SimulatedEngine};
use model_manager::{ManagerOptions, ModelLifecycleManager};
use serve_config::{ConfigManager, EngineSettings, ModelSettings, ServerSettings};

/// Loads the engine described by `settings`
pub async fn load_engine(settings: &ModelSettings) -> Result<Box<dyn InferenceEngine>> {
    let engine: Box<dyn InferenceEngine> = match &settings.engine {
        EngineSettings::Simulated(options) => {
            Box::new(SimulatedEngine::load(&settings.model_id, options.clone()).await?)
        }
        EngineSettings::Remote(options) => {
            Box::new(RemoteEngine::connect(&settings.model_id, options.clone()).await?)
        }
    };
    Ok(engine)
}

/// Lifecycle manager options for one configured model
pub fn manager_options(settings: &ModelSettings, server: &ServerSettings) -> ManagerOptions {
    ManagerOptions {
        name: settings.name.clone(),
        model_id: settings.model_id.clone(),
        default_sampling: settings.sampling,
        sleep_level: settings.sleep_level,
        generation_timeout: server.generation_timeout(),
    }
}

/// The assembled server: one lifecycle manager per configured model
pub struct LlmServeApp {
    /// Configuration manager
    config_manager: Arc<ConfigManager>,

    /// Model bindings, in configuration order
    bindings: Vec<Arc<ModelBinding>>,
}

impl LlmServeApp {
    /// Loads every configured model and puts it to sleep
    ///
    /// A model that fails to load does not stop the server; its endpoints
    /// answer with an initialization error.
    pub async fn new(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let settings = config_manager.settings();
        info!("Initializing LLM Serve with {} model(s)", settings.models.len());

        let managers = join_all(settings.models.iter().map(|model| {
            ModelLifecycleManager::initialize(manager_options(model, settings), load_engine(model))
        }))
        .await;

        let bindings: Vec<Arc<ModelBinding>> = settings
            .models
            .iter()
            .zip(managers)
            .map(|(model, manager)| {
                if let Some(reason) = manager.state().failure_reason() {
                    warn!("Model {} is unavailable: {}", model.name, reason);
                }
                Arc::new(ModelBinding::new(
                    model.name.clone(),
                    model.display_name(),
                    model.endpoints.clone(),
                    Arc::new(manager),
                ))
            })
            .collect();

        Ok(Self {
            config_manager,
            bindings,
        })
    }

    /// Configuration manager
    pub fn config_manager(&self) -> Arc<ConfigManager> {
        self.config_manager.clone()
    }

    /// Model bindings
    pub fn bindings(&self) -> &[Arc<ModelBinding>] {
        &self.bindings
    }

    /// Finds a binding by model name
    pub fn binding(&self, name: &str) -> Option<Arc<ModelBinding>> {
        self.bindings.iter().find(|b| b.name == name).cloned()
    }

    /// Resolves the configured listen address
    pub fn bind_address(&self) -> Result<SocketAddr> {
        let server = &self.config_manager.settings().server;
        (server.host.as_str(), server.port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {}", server.bind_address()))?
            .next()
            .ok_or_else(|| anyhow!("{} resolved to no address", server.bind_address()))
    }

    /// HTTP server for the bindings
    pub fn server(&self) -> Result<ApiServer> {
        Ok(ApiServer::new(self.bind_address()?, self.bindings.clone()))
    }

    /// Serves until Ctrl-C, then releases every model
    pub async fn run(self) -> Result<()> {
        let server = self.server()?;
        server.run().await?;
        info!("LLM Serve stopped");
        Ok(())
    }
}
