//! Inference engine contract
//!
//! The lifecycle manager owns exactly one engine and drives it through the
//! wake → generate → sleep bracket. Engines report failures through
//! `anyhow`; the manager classifies them.

use anyhow::Result;
use async_trait::async_trait;

use common::{SamplingConfig, SleepLevel};

/// Output of a single generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Token ids emitted by the engine, in order
    pub token_ids: Vec<u32>,
}

impl Completion {
    /// Number of emitted tokens
    pub fn token_count(&self) -> usize {
        self.token_ids.len()
    }
}

/// A loaded model instance that supports sleep mode
///
/// Implementations are exclusively owned by one lifecycle manager and are
/// never called concurrently.
#[async_trait]
pub trait InferenceEngine: Send {
    /// Identifier of the loaded model
    fn model_id(&self) -> &str;

    /// Restores the state released by [`InferenceEngine::sleep`]
    async fn wake_up(&mut self) -> Result<()>;

    /// Releases heavy state according to `level`
    async fn sleep(&mut self, level: SleepLevel) -> Result<()>;

    /// Drops cached prefix computations
    async fn reset_prefix_cache(&mut self) -> Result<()>;

    /// Generates a completion for `prompt`; the engine must be awake
    async fn generate(&mut self, prompt: &str, sampling: &SamplingConfig) -> Result<Completion>;

    /// Releases the underlying resource at process shutdown
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
