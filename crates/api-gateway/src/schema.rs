//! Request and response documents

use serde::{Deserialize, Serialize};

use common::error::{Error, Result};
use common::{GenerationRequest, GenerationResult, SamplingConfig};

/// Body of a generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequestBody {
    /// Text to complete
    pub prompt: String,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling probability mass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Maximum number of generated tokens; signed so negatives are reported
    /// as invalid parameters rather than malformed bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

impl GenerateRequestBody {
    /// Creates a body with only a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }

    fn has_sampling_fields(&self) -> bool {
        self.temperature.is_some() || self.top_p.is_some() || self.max_tokens.is_some()
    }

    /// Converts the body into a validated generation request
    ///
    /// Without sampling fields the model's stored default applies. With any
    /// of them, the missing ones take the built-in `SamplingConfig::default()`
    /// values, not the model's configured default, and the resulting config
    /// replaces the stored default for this request. A model configured with
    /// `max_tokens: 64` therefore generates up to 512 tokens for a request
    /// that only sets `temperature`.
    pub fn into_request(self) -> Result<GenerationRequest> {
        let sampling = if self.has_sampling_fields() {
            let defaults = SamplingConfig::default();

            let max_tokens = match self.max_tokens {
                Some(value) if value < 1 => {
                    return Err(Error::InvalidParameter(format!(
                        "max_tokens must be at least 1, got {}",
                        value
                    )))
                }
                Some(value) => u32::try_from(value).map_err(|_| {
                    Error::InvalidParameter(format!("max_tokens is too large, got {}", value))
                })?,
                None => defaults.max_tokens,
            };

            Some(SamplingConfig::new(
                self.temperature.unwrap_or(defaults.temperature),
                self.top_p.unwrap_or(defaults.top_p),
                max_tokens,
            )?)
        } else {
            None
        };

        let request = GenerationRequest {
            prompt: self.prompt,
            sampling,
        };
        request.validate()?;

        Ok(request)
    }
}

/// Body of a successful generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponseBody {
    /// Generated text
    pub text: String,

    /// Display name of the model that produced the text
    pub model: String,

    /// Seconds spent in the wake/generate/sleep bracket
    pub processing_time: f64,

    /// Number of emitted tokens
    pub tokens_generated: usize,
}

impl GenerateResponseBody {
    /// Wraps a generation result for `model`
    pub fn from_result(model: impl Into<String>, result: GenerationResult) -> Self {
        Self {
            text: result.text,
            model: model.into(),
            processing_time: result.processing_time.as_secs_f64(),
            tokens_generated: result.tokens_generated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub models: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub available_models: Vec<ModelEntry>,
}

/// Body of every error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine readable error kind
    pub error: String,

    /// Short human readable diagnostic
    pub detail: String,
}
