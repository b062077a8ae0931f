//! Ray dashboard client
//!
//! Talks to the dashboard's serve and package endpoints. Requests are sent
//! once; a failed deployment is recovered by re-running the tool.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use common::error::{Error, Result};

use crate::address::validate_dashboard_address;
use crate::package::parse_package_uri;

/// Oldest Ray release with the serve REST API
pub const MIN_RAY_VERSION: (u64, u64) = (1, 12);

/// Operations the applier needs from the control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Deletes every deployed application
    async fn delete_applications(&self) -> Result<()>;

    /// Submits the full deploy document
    async fn deploy_applications(&self, payload: &Value) -> Result<()>;

    /// Returns true if a package with this URI is already stored
    async fn package_exists(&self, uri: &str) -> Result<bool>;

    /// Stores a zipped package under `uri`
    async fn upload_package(&self, uri: &str, package: Vec<u8>) -> Result<()>;
}

/// Connection options for [`DashboardClient`]
#[derive(Debug, Clone)]
pub struct DashboardOptions {
    /// Dashboard HTTP(S) address
    pub address: String,

    /// Bearer token sent with every request
    pub token: Option<String>,

    /// Verify the dashboard's TLS certificate
    pub verify_tls: bool,

    /// Per-request timeout
    pub timeout: Duration,
}

impl DashboardOptions {
    /// Options for `address` without a token or certificate verification
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
            verify_tls: false,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    ray_version: String,
}

/// Parses the leading `major.minor` of a Ray version string
fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

fn transport(context: &str, e: reqwest::Error) -> Error {
    Error::Transport(format!("{}: {}", context, e))
}

/// HTTP client for a Ray dashboard
#[derive(Debug, Clone)]
pub struct DashboardClient {
    base_url: String,
    client: Client,
}

impl DashboardClient {
    /// Validates the address, then checks the dashboard's Ray version
    pub async fn connect(options: DashboardOptions) -> Result<Self> {
        let base_url = validate_dashboard_address(&options.address)?;

        let mut headers = HeaderMap::new();
        if let Some(token) = options.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                Error::ConfigValidation("token contains characters not allowed in a header".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        if !options.verify_tls {
            warn!("TLS certificate verification is disabled for {}", base_url);
        }

        let client = Client::builder()
            .user_agent(concat!("serve-deploy/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .danger_accept_invalid_certs(!options.verify_tls)
            .timeout(options.timeout)
            .build()
            .map_err(|e| transport("failed to build HTTP client", e))?;

        let dashboard = Self { base_url, client };
        dashboard.check_version().await?;
        Ok(dashboard)
    }

    /// Dashboard base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| transport(what, e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "{} failed with {}: {}",
                what,
                status,
                body.trim()
            )));
        }

        Ok(response)
    }

    async fn check_version(&self) -> Result<()> {
        let not_supported = || {
            Error::Transport(
                "Serve CLI is not supported on the Ray cluster. \
                 Please ensure the cluster is running Ray 1.12 or higher."
                    .to_string(),
            )
        };

        let response = self
            .client
            .get(self.url("/api/ray/version"))
            .send()
            .await
            .map_err(|e| transport(&format!("failed to connect to {}", self.base_url), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_supported());
        }
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "version check against {} failed with {}",
                self.base_url,
                response.status()
            )));
        }

        let version: VersionResponse = response
            .json()
            .await
            .map_err(|e| transport("malformed version response", e))?;

        match parse_major_minor(&version.ray_version) {
            Some(found) if found >= MIN_RAY_VERSION => {
                info!("Connected to Ray {} at {}", version.ray_version, self.base_url);
                Ok(())
            }
            _ => Err(not_supported()),
        }
    }

    fn package_url(&self, uri: &str) -> Result<String> {
        let (protocol, name) = parse_package_uri(uri)?;
        Ok(self.url(&format!("/api/packages/{}/{}", protocol, name)))
    }
}

#[async_trait]
impl ControlPlane for DashboardClient {
    async fn delete_applications(&self) -> Result<()> {
        info!("Deleting all applications on {}", self.base_url);
        self.send(
            self.client.delete(self.url("/api/serve/applications/")),
            "delete applications",
        )
        .await?;
        Ok(())
    }

    async fn deploy_applications(&self, payload: &Value) -> Result<()> {
        info!("Submitting serve config to {}", self.base_url);
        self.send(
            self.client
                .put(self.url("/api/serve/applications/"))
                .json(payload),
            "deploy applications",
        )
        .await?;
        Ok(())
    }

    async fn package_exists(&self, uri: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.package_url(uri)?)
            .send()
            .await
            .map_err(|e| transport("package lookup", e))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::Transport(format!(
                "package lookup for {} failed with {}",
                uri, status
            ))),
        }
    }

    async fn upload_package(&self, uri: &str, package: Vec<u8>) -> Result<()> {
        debug!("PUT {} ({} bytes)", uri, package.len());
        self.send(
            self.client.put(self.package_url(uri)?).body(package),
            "package upload",
        )
        .await?;
        Ok(())
    }
}
