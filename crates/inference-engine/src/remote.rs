//! vLLM server engine
//!
//! Drives a vLLM OpenAI-compatible server started with sleep mode enabled
//! and its development endpoints exposed (`/sleep`, `/wake_up`,
//! `/reset_prefix_cache`). Generation goes through `/v1/completions` with
//! token ids requested in the logprobs so emitted tokens can be counted.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use common::{SamplingConfig, SleepLevel};

use crate::engine::{Completion, InferenceEngine};

/// Connection options for a vLLM server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEngineOptions {
    /// Base URL of the server, e.g. `http://127.0.0.1:8000`
    pub base_url: String,
    /// Model name the server was started with, defaults to the model id
    #[serde(default)]
    pub served_model_name: Option<String>,
    /// Bearer token expected by the server
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Debug, Deserialize)]
struct ChoiceLogprobs {
    tokens: Vec<String>,
}

/// Engine backed by a vLLM HTTP server
pub struct RemoteEngine {
    model_id: String,
    served_model_name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl RemoteEngine {
    /// Connects to the server and checks that it is healthy
    pub async fn connect(model_id: &str, options: RemoteEngineOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("llm-serve/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let engine = Self {
            model_id: model_id.to_string(),
            served_model_name: options
                .served_model_name
                .unwrap_or_else(|| model_id.to_string()),
            base_url: options.base_url.trim_end_matches('/').to_string(),
            api_key: options.api_key,
            client,
        };

        info!("Connecting to vLLM server at {} for {}", engine.base_url, model_id);

        engine
            .send(engine.client.get(engine.url("/health")))
            .await
            .with_context(|| format!("vLLM server at {} is not healthy", engine.base_url))?;

        Ok(engine)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("vLLM server returned {}: {}", status, body.trim());
        }

        Ok(response)
    }

    async fn post(&self, path: &str) -> Result<()> {
        debug!("POST {} for {}", path, self.model_id);
        self.send(self.client.post(self.url(path))).await?;
        Ok(())
    }
}

/// Parses a `token_id:<n>` entry returned when token ids replace token strings
fn parse_token_id(token: &str) -> Result<u32> {
    token
        .strip_prefix("token_id:")
        .ok_or_else(|| anyhow!("unexpected token format {:?}", token))?
        .parse()
        .with_context(|| format!("invalid token id in {:?}", token))
}

#[async_trait]
impl InferenceEngine for RemoteEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn wake_up(&mut self) -> Result<()> {
        self.post("/wake_up").await
    }

    async fn sleep(&mut self, level: SleepLevel) -> Result<()> {
        self.post(&format!("/sleep?level={}", level.as_u8())).await
    }

    async fn reset_prefix_cache(&mut self) -> Result<()> {
        self.post("/reset_prefix_cache").await
    }

    async fn generate(&mut self, prompt: &str, sampling: &SamplingConfig) -> Result<Completion> {
        let body = json!({
            "model": self.served_model_name,
            "prompt": prompt,
            "temperature": sampling.temperature,
            "top_p": sampling.top_p,
            "max_tokens": sampling.max_tokens,
            "logprobs": 0,
            "return_tokens_as_token_ids": true,
        });

        let response: CompletionResponse = self
            .send(self.client.post(self.url("/v1/completions")).json(&body))
            .await?
            .json()
            .await
            .context("malformed completion response")?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("completion response contained no choices"))?;

        let logprobs = choice
            .logprobs
            .ok_or_else(|| anyhow!("completion response did not include token ids"))?;

        let token_ids = logprobs
            .tokens
            .iter()
            .map(|t| parse_token_id(t))
            .collect::<Result<Vec<_>>>()?;

        Ok(Completion {
            text: choice.text,
            token_ids,
        })
    }
}
