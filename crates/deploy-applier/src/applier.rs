//! Deployment pipeline
//!
//! Runs strictly in order: optional delete-all, config load and
//! validation, working directory uploads, then one submission of the whole
//! config. Any failure stops the pipeline.

use serde_json::Value;
use tracing::{debug, info};

use common::error::Result;

use crate::client::ControlPlane;
use crate::package::upload_working_dir_if_needed;
use crate::schema::{RuntimeEnv, ServeDeployConfig, LOCAL_WORKING_DIR, WORKING_DIR};

/// Guidance printed after a successful submission
pub const FOLLOW_UP: &str = "\nSent deploy request successfully.\n \
* Use `serve status` to check applications' statuses.\n \
* Use `serve config` to see the current application config(s).\n";

/// What to deploy and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Config file path or `module:attribute` import path
    pub config_source: String,

    /// Delete every deployed application first
    pub pre_delete: bool,

    /// Application name for import paths
    pub name: Option<String>,
}

impl DeployRequest {
    /// Request deploying `config_source` without deleting anything first
    pub fn new(config_source: impl Into<String>) -> Self {
        Self {
            config_source: config_source.into(),
            pre_delete: false,
            name: None,
        }
    }
}

async fn resolve_runtime_env<P>(plane: &P, runtime_env: &mut RuntimeEnv) -> Result<()>
where
    P: ControlPlane + ?Sized,
{
    if let Some(local) = runtime_env.remove(LOCAL_WORKING_DIR) {
        debug!("Resolving local working directory {}", local);
        runtime_env.insert(WORKING_DIR.to_string(), local);
        upload_working_dir_if_needed(plane, runtime_env).await?;
    }
    Ok(())
}

/// Deploys `request` through `plane` and returns the submitted config
pub async fn deploy<P>(request: &DeployRequest, plane: &P) -> Result<ServeDeployConfig>
where
    P: ControlPlane + ?Sized,
{
    if request.pre_delete {
        plane.delete_applications().await?;
    }

    let mut config = ServeDeployConfig::load(&request.config_source, request.name.as_deref())?;
    config.validate()?;

    for app in config.applications.iter_mut() {
        for runtime_env in app.runtime_envs_mut() {
            resolve_runtime_env(plane, runtime_env).await?;
        }
    }

    let payload: Value = config.to_payload()?;
    plane.deploy_applications(&payload).await?;

    info!(
        "Submitted {} application(s) from {}",
        config.applications.len(),
        request.config_source
    );

    Ok(config)
}

/// Human readable summary of the submitted applications
pub fn render_applications(config: &ServeDeployConfig) -> String {
    let mut lines = Vec::with_capacity(config.applications.len());

    for app in &config.applications {
        let route = match &app.route_prefix {
            Some(Some(prefix)) => prefix.as_str(),
            Some(None) => "<no route>",
            None => "<default route>",
        };
        let working_dir = app
            .runtime_env
            .as_ref()
            .and_then(|env| env.get(WORKING_DIR))
            .and_then(Value::as_str)
            .map(|dir| format!(" working_dir={}", dir))
            .unwrap_or_default();

        lines.push(format!(
            "- {} ({}) route={}{}",
            app.effective_name(),
            app.import_path,
            route,
            working_dir
        ));
    }

    lines.join("\n")
}
