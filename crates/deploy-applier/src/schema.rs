//! Serve deploy config schema
//!
//! Only the fields the applier inspects are typed. Everything else is kept
//! verbatim, and every field absent from the source file stays absent from
//! the submitted payload so server-side defaults are not overwritten.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use common::error::{Error, Result};

/// Runtime environment of an application or deployment
pub type RuntimeEnv = Map<String, Value>;

/// Runtime env key naming a directory on the operator's machine
pub const LOCAL_WORKING_DIR: &str = "local_working_dir";

/// Runtime env key the control plane resolves
pub const WORKING_DIR: &str = "working_dir";

/// Application name used when an import path is deployed directly
pub const DEFAULT_APP_NAME: &str = "default";

/// Keeps an explicit `null` distinct from an absent field
fn explicit<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Top-level deploy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeDeployConfig {
    /// Applications to run; the submitted list replaces whatever is deployed
    pub applications: Vec<ServeApplication>,

    /// Untyped top-level settings such as `proxy_location` or `http_options`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One application of a deploy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeApplication {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// `Some(None)` when the file sets the prefix to null explicitly
    #[serde(
        default,
        deserialize_with = "explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub route_prefix: Option<Option<String>>,

    pub import_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_env: Option<RuntimeEnv>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<Vec<DeploymentSchema>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-deployment overrides inside an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSchema {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ray_actor_options: Option<RayActorOptions>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Actor options of a deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RayActorOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_env: Option<RuntimeEnv>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServeApplication {
    /// Application deploying `import_path` with nothing else set
    pub fn from_import_path(import_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            route_prefix: None,
            import_path: import_path.into(),
            runtime_env: None,
            deployments: None,
            extra: Map::new(),
        }
    }

    /// Name the control plane will give the application
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_APP_NAME)
    }

    /// Application-level and deployment-level runtime envs, in file order
    pub fn runtime_envs_mut(&mut self) -> Vec<&mut RuntimeEnv> {
        let mut envs = Vec::new();

        if let Some(env) = self.runtime_env.as_mut() {
            envs.push(env);
        }

        for deployment in self.deployments.iter_mut().flatten() {
            if let Some(env) = deployment
                .ray_actor_options
                .as_mut()
                .and_then(|options| options.runtime_env.as_mut())
            {
                envs.push(env);
            }
        }

        envs
    }

    fn runtime_envs(&self) -> Vec<&RuntimeEnv> {
        let mut envs: Vec<&RuntimeEnv> = self.runtime_env.iter().collect();
        for deployment in self.deployments.iter().flatten() {
            if let Some(env) = deployment
                .ray_actor_options
                .as_ref()
                .and_then(|options| options.runtime_env.as_ref())
            {
                envs.push(env);
            }
        }
        envs
    }
}

/// Returns true if `source` looks like `package.module:attribute`
fn is_import_path(source: &str) -> bool {
    let looks_like_file = source.ends_with(".yaml") || source.ends_with(".yml");

    !source.is_empty()
        && !looks_like_file
        && !source.contains('/')
        && !source.chars().any(char::is_whitespace)
        && (source.contains(':') || source.contains('.'))
}

impl ServeDeployConfig {
    /// Parses a YAML deploy document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::ConfigValidation(format!("invalid serve config: {}", e)))
    }

    /// Loads a config file, or builds a one-application config from an import path
    ///
    /// `name` only applies to import paths; it defaults to `default`.
    pub fn load(source: &str, name: Option<&str>) -> Result<Self> {
        let path = Path::new(source);

        if path.is_file() {
            let contents = std::fs::read_to_string(path)?;
            return Self::from_yaml(&contents);
        }

        if is_import_path(source) {
            let app = ServeApplication::from_import_path(source, name.unwrap_or(DEFAULT_APP_NAME));
            return Ok(Self {
                applications: vec![app],
                extra: Map::new(),
            });
        }

        Err(Error::ConfigValidation(format!(
            "'{}' is neither an existing config file nor an import path",
            source
        )))
    }

    /// Checks the document before anything is uploaded or submitted
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut prefixes = HashSet::new();

        for app in &self.applications {
            let name = app.effective_name();

            if !names.insert(name) {
                return Err(Error::ConfigValidation(format!(
                    "application name '{}' is used more than once",
                    name
                )));
            }

            if app.import_path.trim().is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "application '{}' has an empty import_path",
                    name
                )));
            }

            if let Some(Some(prefix)) = &app.route_prefix {
                if !prefix.starts_with('/') {
                    return Err(Error::ConfigValidation(format!(
                        "route_prefix '{}' of application '{}' must start with '/'",
                        prefix, name
                    )));
                }

                if !prefixes.insert(prefix.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "route_prefix '{}' is used by more than one application",
                        prefix
                    )));
                }
            }

            let mut deployment_names = HashSet::new();
            for deployment in app.deployments.iter().flatten() {
                if deployment.name.trim().is_empty() {
                    return Err(Error::ConfigValidation(format!(
                        "application '{}' has a deployment without a name",
                        name
                    )));
                }

                if !deployment_names.insert(deployment.name.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "deployment '{}' appears twice in application '{}'",
                        deployment.name, name
                    )));
                }
            }

            for env in app.runtime_envs() {
                match env.get(LOCAL_WORKING_DIR) {
                    None | Some(Value::String(_)) => {}
                    Some(other) => {
                        return Err(Error::ConfigValidation(format!(
                            "{} of application '{}' must be a path, got {}",
                            LOCAL_WORKING_DIR, name, other
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    /// JSON payload holding only the fields that were set
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONFIG: &str = r#"
proxy_location: EveryNode
applications:
  - name: llm
    route_prefix: /
    import_path: llm_improved:app
    runtime_env:
      local_working_dir: ./service
      pip: [vllm]
    deployments:
      - name: LLMServingAPI
        num_replicas: 1
        ray_actor_options:
          num_gpus: 1
          runtime_env:
            env_vars: {HF_HOME: /models}
  - name: hello
    route_prefix: null
    import_path: serve_app:app
"#;

    #[test]
    fn test_unset_fields_are_omitted() {
        let config = ServeDeployConfig::from_yaml(CONFIG).unwrap();
        let payload = config.to_payload().unwrap();

        assert_eq!(payload["proxy_location"], "EveryNode");
        let llm = &payload["applications"][0];
        assert_eq!(llm["deployments"][0]["num_replicas"], 1);
        assert_eq!(llm["deployments"][0]["ray_actor_options"]["num_gpus"], 1);
        assert!(llm["deployments"][0].get("user_config").is_none());

        let hello = payload["applications"][1].as_object().unwrap();
        assert_eq!(hello.get("route_prefix"), Some(&Value::Null));
        assert!(hello.get("runtime_env").is_none());
        assert!(hello.get("deployments").is_none());
        assert_eq!(hello.len(), 3);
    }

    #[test]
    fn test_runtime_envs_cover_apps_and_deployments() {
        let mut config = ServeDeployConfig::from_yaml(CONFIG).unwrap();
        let envs = config.applications[0].runtime_envs_mut();
        assert_eq!(envs.len(), 2);
        assert!(envs[0].contains_key(LOCAL_WORKING_DIR));
        assert!(envs[1].contains_key("env_vars"));
        assert!(config.applications[1].runtime_envs_mut().is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(ServeDeployConfig::from_yaml(CONFIG).unwrap().validate().is_ok());

        let mut config = ServeDeployConfig::from_yaml(CONFIG).unwrap();
        config.applications[1].name = Some("llm".to_string());
        assert!(config.validate().is_err());

        let mut config = ServeDeployConfig::from_yaml(CONFIG).unwrap();
        config.applications[1].route_prefix = Some(Some("/".to_string()));
        assert!(config.validate().is_err());

        let mut config = ServeDeployConfig::from_yaml(CONFIG).unwrap();
        config.applications[0].route_prefix = Some(Some("api".to_string()));
        assert!(config.validate().is_err());

        let mut config = ServeDeployConfig::from_yaml(CONFIG).unwrap();
        config.applications[0]
            .runtime_env
            .as_mut()
            .unwrap()
            .insert(LOCAL_WORKING_DIR.to_string(), json!(42));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_yaml_is_a_validation_error() {
        let err = ServeDeployConfig::from_yaml("applications: [{name: x}]").unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
    }

    #[test]
    fn test_import_path_yields_single_application() {
        let config = ServeDeployConfig::load("llm_improved:app", None).unwrap();
        assert_eq!(config.applications.len(), 1);
        assert_eq!(config.applications[0].effective_name(), "default");
        assert_eq!(
            config.to_payload().unwrap(),
            json!({"applications": [{"name": "default", "import_path": "llm_improved:app"}]})
        );

        let config = ServeDeployConfig::load("llm_improved:app", Some("llm")).unwrap();
        assert_eq!(config.applications[0].name.as_deref(), Some("llm"));
    }

    #[test]
    fn test_load_file_and_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serve.yaml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = ServeDeployConfig::load(path.to_str().unwrap(), Some("ignored")).unwrap();
        assert_eq!(config.applications.len(), 2);
        assert_eq!(config.applications[0].effective_name(), "llm");

        let missing = dir.path().join("missing.yaml");
        let err = ServeDeployConfig::load(missing.to_str().unwrap(), None).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
    }
}
