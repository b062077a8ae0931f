//! Simulated inference engine
//!
//! A deterministic in-process engine used for local runs without a GPU and
//! by the test suites. It enforces the power-state contract of a real
//! sleep-mode engine (no generation while asleep, no double wake) and
//! records every call in an [`EngineJournal`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{PowerState, SamplingConfig, SleepLevel};

use crate::engine::{Completion, InferenceEngine};

/// Options for a simulated engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedEngineOptions {
    /// Refuse to load the model
    pub fail_load: bool,
    /// Artificial latency per generated token in milliseconds
    pub token_latency_ms: u64,
}

/// A call observed by a simulated engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Model weights loaded
    Loaded,
    /// `wake_up` called
    WakeUp,
    /// `generate` called with the effective sampling config
    Generate {
        /// Prompt passed to the engine
        prompt: String,
        /// Sampling config passed to the engine
        sampling: SamplingConfig,
    },
    /// `reset_prefix_cache` called
    ResetPrefixCache,
    /// `sleep` called
    Sleep(SleepLevel),
    /// `shutdown` called
    Shutdown,
}

/// Shared record of engine calls and fault switches
///
/// Cloning is cheap; all clones observe the same engine.
#[derive(Debug, Clone, Default)]
pub struct EngineJournal {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    fail_wake: Arc<AtomicBool>,
    fail_generate: Arc<AtomicBool>,
    fail_sleep: Arc<AtomicBool>,
    panic_generate: Arc<AtomicBool>,
}

impl EngineJournal {
    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Clears recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Makes subsequent `wake_up` calls fail
    pub fn set_fail_wake(&self, fail: bool) {
        self.fail_wake.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `generate` calls fail
    pub fn set_fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `sleep` calls fail
    pub fn set_fail_sleep(&self, fail: bool) {
        self.fail_sleep.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `generate` calls panic
    pub fn set_panic_generate(&self, panic: bool) {
        self.panic_generate.store(panic, Ordering::SeqCst);
    }

    fn record(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

/// Deterministic engine that produces word-level tokens
pub struct SimulatedEngine {
    model_id: String,
    power_state: PowerState,
    shut_down: bool,
    token_latency: Duration,
    journal: EngineJournal,
}

impl SimulatedEngine {
    /// Loads a simulated model; the engine starts awake like a freshly loaded model
    pub async fn load(model_id: &str, options: SimulatedEngineOptions) -> Result<Self> {
        Self::load_with_journal(model_id, options, EngineJournal::default()).await
    }

    /// Loads a simulated model that records into an existing journal
    pub async fn load_with_journal(
        model_id: &str,
        options: SimulatedEngineOptions,
        journal: EngineJournal,
    ) -> Result<Self> {
        if model_id.trim().is_empty() {
            bail!("model id must not be empty");
        }

        if options.fail_load {
            bail!("failed to load model weights for {}", model_id);
        }

        debug!("Simulated engine loaded model {}", model_id);
        journal.record(EngineEvent::Loaded);

        Ok(Self {
            model_id: model_id.to_string(),
            power_state: PowerState::Awake,
            shut_down: false,
            token_latency: Duration::from_millis(options.token_latency_ms),
            journal,
        })
    }

    /// Handle on this engine's call record and fault switches
    pub fn journal(&self) -> EngineJournal {
        self.journal.clone()
    }

    /// Current power state as seen by the engine
    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            bail!("engine for {} has been shut down", self.model_id);
        }
        Ok(())
    }

    fn reply_words(&self, prompt: &str, max_tokens: u32) -> Vec<String> {
        let short_name = self
            .model_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.model_id)
            .to_string();

        format!("{} answers: {}", short_name, prompt)
            .split_whitespace()
            .take(max_tokens as usize)
            .map(str::to_string)
            .collect()
    }
}

/// Stable token id for a word
fn token_id(word: &str) -> u32 {
    word.bytes()
        .fold(2_166_136_261u32, |hash, b| (hash ^ b as u32).wrapping_mul(16_777_619))
}

#[async_trait]
impl InferenceEngine for SimulatedEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn wake_up(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.journal.record(EngineEvent::WakeUp);

        if self.journal.fail_wake.load(Ordering::SeqCst) {
            bail!("wake_up failed for {}", self.model_id);
        }

        if self.power_state == PowerState::Awake {
            bail!("{} is already awake", self.model_id);
        }

        self.power_state = PowerState::Awake;
        Ok(())
    }

    async fn sleep(&mut self, level: SleepLevel) -> Result<()> {
        self.ensure_running()?;
        self.journal.record(EngineEvent::Sleep(level));

        if self.journal.fail_sleep.load(Ordering::SeqCst) {
            bail!("sleep(level={}) failed for {}", level, self.model_id);
        }

        self.power_state = PowerState::Asleep;
        Ok(())
    }

    async fn reset_prefix_cache(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.journal.record(EngineEvent::ResetPrefixCache);
        Ok(())
    }

    async fn generate(&mut self, prompt: &str, sampling: &SamplingConfig) -> Result<Completion> {
        self.ensure_running()?;
        self.journal.record(EngineEvent::Generate {
            prompt: prompt.to_string(),
            sampling: *sampling,
        });

        if self.power_state != PowerState::Awake {
            return Err(anyhow!("{} is asleep; wake it before generating", self.model_id));
        }

        if self.journal.panic_generate.load(Ordering::SeqCst) {
            panic!("simulated engine panic while generating");
        }

        if self.journal.fail_generate.load(Ordering::SeqCst) {
            bail!("generation failed for {}", self.model_id);
        }

        let words = self.reply_words(prompt, sampling.max_tokens);

        if !self.token_latency.is_zero() {
            tokio::time::sleep(self.token_latency * words.len() as u32).await;
        }

        Ok(Completion {
            token_ids: words.iter().map(|w| token_id(w)).collect(),
            text: words.join(" "),
        })
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.journal.record(EngineEvent::Shutdown);
        self.shut_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refuses_to_generate_while_asleep() {
        let mut engine = SimulatedEngine::load("Qwen/Qwen2.5-7B-Instruct", Default::default())
            .await
            .unwrap();
        engine.sleep(SleepLevel::Offload).await.unwrap();

        let sampling = SamplingConfig::default();
        assert!(engine.generate("hello", &sampling).await.is_err());

        engine.wake_up().await.unwrap();
        let completion = engine.generate("hello there", &sampling).await.unwrap();
        assert_eq!(completion.text, "Qwen2.5-7B-Instruct answers: hello there");
        assert_eq!(completion.token_count(), 4);
    }

    #[tokio::test]
    async fn test_double_wake_is_rejected() {
        let mut engine = SimulatedEngine::load("m", Default::default()).await.unwrap();
        assert!(engine.wake_up().await.is_err());
    }

    #[tokio::test]
    async fn test_max_tokens_truncates_output() {
        let mut engine = SimulatedEngine::load("m", Default::default()).await.unwrap();
        let sampling = SamplingConfig {
            max_tokens: 2,
            ..SamplingConfig::default()
        };
        let completion = engine
            .generate("a long prompt with many words", &sampling)
            .await
            .unwrap();
        assert_eq!(completion.token_ids.len(), 2);
        assert_eq!(completion.text, "m answers:");
    }

    #[tokio::test]
    async fn test_fault_switches_and_journal() {
        let options = SimulatedEngineOptions {
            fail_load: true,
            ..Default::default()
        };
        assert!(SimulatedEngine::load("m", options).await.is_err());

        let mut engine = SimulatedEngine::load("m", Default::default()).await.unwrap();
        let journal = engine.journal();
        journal.set_fail_sleep(true);
        assert!(engine.sleep(SleepLevel::Discard).await.is_err());
        assert_eq!(engine.power_state(), PowerState::Awake);

        journal.set_fail_sleep(false);
        engine.sleep(SleepLevel::Discard).await.unwrap();
        assert_eq!(
            journal.events(),
            vec![
                EngineEvent::Loaded,
                EngineEvent::Sleep(SleepLevel::Discard),
                EngineEvent::Sleep(SleepLevel::Discard),
            ]
        );
    }
}
