//! Exclusive handle on one loaded model
//!
//! A [`ModelHandle`] owns the engine for a single model and is only ever
//! touched by the lifecycle manager that created it, under that manager's
//! mutex.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use common::{PowerState, SamplingConfig, SleepLevel};
use inference_engine::{Completion, InferenceEngine};

use crate::state::LifecycleState;

/// Loaded model plus its power state
pub struct ModelHandle {
    /// Model identifier
    model_id: String,

    /// Engine; `None` once the handle has been shut down
    engine: Option<Box<dyn InferenceEngine>>,

    /// Power state as last confirmed by the engine
    power_state: PowerState,

    /// Default sampling configuration
    default_sampling: SamplingConfig,

    /// Sleep depth used when releasing the model
    sleep_level: SleepLevel,

    /// Lifecycle state shared with the owning manager
    state: Arc<RwLock<LifecycleState>>,
}

impl ModelHandle {
    /// Wraps a freshly loaded engine; loaded engines start awake
    pub(crate) fn new(
        engine: Box<dyn InferenceEngine>,
        default_sampling: SamplingConfig,
        sleep_level: SleepLevel,
        state: Arc<RwLock<LifecycleState>>,
    ) -> Self {
        Self {
            model_id: engine.model_id().to_string(),
            engine: Some(engine),
            power_state: PowerState::Awake,
            default_sampling,
            sleep_level,
            state,
        }
    }

    /// Model identifier
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Power state as last confirmed by the engine
    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    /// Default sampling configuration
    pub fn default_sampling(&self) -> SamplingConfig {
        self.default_sampling
    }

    /// Returns true once the engine has been released
    pub fn is_shut_down(&self) -> bool {
        self.engine.is_none()
    }

    fn engine(&mut self) -> Result<&mut Box<dyn InferenceEngine>> {
        let model_id = &self.model_id;
        self.engine
            .as_mut()
            .ok_or_else(|| anyhow!("model {} has been shut down", model_id))
    }

    fn transition_to(&self, next: LifecycleState) {
        let mut state = self.state.write();
        if *state == next {
            return;
        }

        if !state.can_transition_to(&next) {
            warn!(
                "Unexpected state transition for {}: {} -> {}",
                self.model_id, *state, next
            );
        }

        debug!("State transition for {}: {} -> {}", self.model_id, *state, next);
        *state = next;
    }

    /// Wakes the model
    pub(crate) async fn wake(&mut self) -> Result<()> {
        self.engine()?.wake_up().await?;
        self.power_state = PowerState::Awake;
        self.transition_to(LifecycleState::Awake);
        Ok(())
    }

    /// Runs one generation; the model must be awake
    pub(crate) async fn generate(
        &mut self,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<Completion> {
        self.engine()?.generate(prompt, sampling).await
    }

    /// Clears cached prefixes and puts the model to sleep
    ///
    /// The sleep is attempted even when the cache reset fails; the first
    /// failure is returned.
    pub(crate) async fn release(&mut self) -> Result<()> {
        let level = self.sleep_level;
        let engine = self.engine()?;

        let reset = engine.reset_prefix_cache().await;
        let sleep = engine.sleep(level).await;

        if sleep.is_ok() {
            self.power_state = PowerState::Asleep;
            self.transition_to(LifecycleState::Asleep);
        }

        reset.and(sleep)
    }

    /// Releases the engine; later calls fail
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut engine) = self.engine.take() {
            info!("Releasing model {}", self.model_id);
            engine.shutdown().await?;
        }
        Ok(())
    }
}
