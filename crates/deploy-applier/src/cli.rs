//! Command-line interface of the deploy tool

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use crate::applier::{deploy, render_applications, DeployRequest, FOLLOW_UP};
use crate::client::{DashboardClient, DashboardOptions};

/// Push a multi-application serve config to a Ray dashboard
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "serve-deploy", version, about, long_about = None)]
pub struct DeployArgs {
    /// Serve config file, or a `module:attribute` import path
    #[arg(long, value_name = "PATH")]
    pub serve_config: String,

    /// Dashboard HTTP(S) address, e.g. http://127.0.0.1:8265
    #[arg(long, env = "RAY_DASHBOARD_ADDRESS", value_name = "URL")]
    pub ray_dashboard_address: String,

    /// File holding a bearer token for the dashboard
    #[arg(long, value_name = "PATH")]
    pub ray_token_path: Option<PathBuf>,

    /// Delete every deployed application before submitting
    #[arg(long)]
    pub delete_all_apps_before_upload: bool,

    /// Application name when deploying an import path
    #[arg(long)]
    pub name: Option<String>,

    /// Verify the dashboard's TLS certificate
    #[arg(long)]
    pub verify_tls: bool,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Log debug output to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

/// Reads a token file; surrounding whitespace is dropped
pub fn read_token(path: &Path) -> Result<Option<String>> {
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read token file {}", path.display()))?;
    let token = token.trim();

    if token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(token.to_string()))
    }
}

/// Runs one deployment and prints the submitted applications to stdout
pub async fn run(args: DeployArgs) -> Result<()> {
    let token = match &args.ray_token_path {
        Some(path) => read_token(path)?,
        None => None,
    };
    debug!("Bearer token {}", if token.is_some() { "loaded" } else { "not set" });

    let options = DashboardOptions {
        address: args.ray_dashboard_address.clone(),
        token,
        verify_tls: args.verify_tls,
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let client = DashboardClient::connect(options).await?;

    let request = DeployRequest {
        config_source: args.serve_config.clone(),
        pre_delete: args.delete_all_apps_before_upload,
        name: args.name.clone(),
    };
    let config = deploy(&request, &client).await?;

    println!("{}", render_applications(&config));
    println!("{}", FOLLOW_UP);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        DeployArgs::command().debug_assert();
    }

    #[test]
    fn test_parses_flags() {
        let args = DeployArgs::try_parse_from([
            "serve-deploy",
            "--serve-config",
            "serve.yaml",
            "--ray-dashboard-address",
            "https://ray.example.com",
            "--ray-token-path",
            "/run/secrets/ray",
            "--delete-all-apps-before-upload",
        ])
        .unwrap();

        assert_eq!(args.serve_config, "serve.yaml");
        assert_eq!(args.ray_dashboard_address, "https://ray.example.com");
        assert_eq!(args.ray_token_path, Some(PathBuf::from("/run/secrets/ray")));
        assert!(args.delete_all_apps_before_upload);
        assert!(!args.verify_tls);
        assert_eq!(args.timeout_secs, 30);
        assert_eq!(args.name, None);
    }

    #[test]
    fn test_serve_config_is_required() {
        let result = DeployArgs::try_parse_from([
            "serve-deploy",
            "--ray-dashboard-address",
            "http://127.0.0.1:8265",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_token_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");

        std::fs::write(&path, "abc123\n").unwrap();
        assert_eq!(read_token(&path).unwrap(), Some("abc123".to_string()));

        std::fs::write(&path, " \n").unwrap();
        assert_eq!(read_token(&path).unwrap(), None);

        assert!(read_token(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_bad_address_fails_without_network() {
        let args = DeployArgs::try_parse_from([
            "serve-deploy",
            "--serve-config",
            "serve_app:app",
            "--ray-dashboard-address",
            "127.0.0.1:8265",
        ])
        .unwrap();

        let err = run(args).await.unwrap_err();
        assert!(err.to_string().contains("http://"));
    }
}
