//! Model lifecycle manager
//!
//! Serializes access to one model through a strict wake → generate → sleep
//! bracket so an idle model never holds its heavy (GPU) state.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

use common::error::{Error, Result};
use common::utils::{execute_with_timeout, format_duration, truncate_string};
use common::{GenerationRequest, GenerationResult, PowerState, SamplingConfig, SleepLevel};
use inference_engine::InferenceEngine;

use crate::handle::ModelHandle;
use crate::state::LifecycleState;

/// Static settings of one managed model
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerOptions {
    /// Short name the model is mounted under, e.g. `qwen`
    pub name: String,

    /// Engine-level model identifier, e.g. `Qwen/Qwen2.5-7B-Instruct`
    pub model_id: String,

    /// Sampling configuration used when a request carries no override
    pub default_sampling: SamplingConfig,

    /// Sleep depth between requests
    pub sleep_level: SleepLevel,

    /// Upper bound on how long a caller waits for a generation
    pub generation_timeout: Option<Duration>,
}

impl ManagerOptions {
    /// Options with default sampling, level-1 sleep and no timeout
    pub fn new(name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_id: model_id.into(),
            default_sampling: SamplingConfig::default(),
            sleep_level: SleepLevel::default(),
            generation_timeout: None,
        }
    }
}

enum Slot {
    Ready(Arc<Mutex<ModelHandle>>),
    Failed(String),
}

/// Owns one model and runs every generation inside a wake/sleep bracket
pub struct ModelLifecycleManager {
    /// Static settings
    options: ManagerOptions,

    /// Loaded handle, or the reason loading failed
    slot: Slot,

    /// Current lifecycle state
    state: Arc<RwLock<LifecycleState>>,
}

impl ModelLifecycleManager {
    /// Loads the model and puts it to sleep
    ///
    /// Never fails: a load error leaves the manager in the terminal
    /// `Failed` state and every later generation reports it.
    pub async fn initialize<F>(options: ManagerOptions, load: F) -> Self
    where
        F: Future<Output = anyhow::Result<Box<dyn InferenceEngine>>>,
    {
        info!("Initializing model {} ({})", options.name, options.model_id);

        let state = Arc::new(RwLock::new(LifecycleState::Uninitialized));

        match Self::prepare(&options, load, state.clone()).await {
            Ok(handle) => {
                info!("Model {} initialized successfully", options.name);
                Self {
                    options,
                    slot: Slot::Ready(Arc::new(Mutex::new(handle))),
                    state,
                }
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!("Failed to initialize model {}: {}", options.name, reason);
                *state.write() = LifecycleState::Failed(reason.clone());
                Self {
                    options,
                    slot: Slot::Failed(reason),
                    state,
                }
            }
        }
    }

    async fn prepare<F>(
        options: &ManagerOptions,
        load: F,
        state: Arc<RwLock<LifecycleState>>,
    ) -> anyhow::Result<ModelHandle>
    where
        F: Future<Output = anyhow::Result<Box<dyn InferenceEngine>>>,
    {
        options.default_sampling.validate()?;

        let engine = load.await?;
        let mut handle = ModelHandle::new(
            engine,
            options.default_sampling,
            options.sleep_level,
            state,
        );

        if let Err(e) = handle.release().await {
            if let Err(shutdown_err) = handle.shutdown().await {
                warn!(
                    "Failed to release model {} after initialization error: {:#}",
                    options.name, shutdown_err
                );
            }
            return Err(e.context("initial sleep failed"));
        }

        Ok(handle)
    }

    /// Short name the model is mounted under
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Engine-level model identifier
    pub fn model_id(&self) -> &str {
        &self.options.model_id
    }

    /// Stored default sampling configuration
    pub fn default_sampling(&self) -> SamplingConfig {
        self.options.default_sampling
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state.read().clone()
    }

    /// Power state of the model, `None` if it never loaded
    pub fn power_state(&self) -> Option<PowerState> {
        match &*self.state.read() {
            LifecycleState::Asleep => Some(PowerState::Asleep),
            LifecycleState::Awake => Some(PowerState::Awake),
            LifecycleState::Uninitialized | LifecycleState::Failed(_) => None,
        }
    }

    /// Generates text for `request`
    ///
    /// Validation happens before the model is touched. Concurrent callers
    /// are served one at a time. The model is put back to sleep on every
    /// exit path, including engine failures and caller timeouts.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let handle = match &self.slot {
            Slot::Ready(handle) => handle.clone(),
            Slot::Failed(reason) => {
                return Err(Error::Initialization(format!(
                    "model {} is unavailable: {}",
                    self.options.name, reason
                )))
            }
        };

        request.validate()?;

        let sampling = request.sampling.unwrap_or(self.options.default_sampling);
        let name = self.options.name.clone();
        let prompt = request.prompt;

        debug!(
            "Queued generation on {} for prompt {:?}",
            name,
            truncate_string(&prompt, 64)
        );

        let span = tracing::info_span!("generate", model = %name);
        let bracket = async move {
            let mut handle = handle.lock_owned().await;

            // Runs detached so a dropped caller cannot skip the sleep step.
            tokio::spawn(
                async move { run_bracket(&mut handle, &name, &prompt, &sampling).await }
                    .instrument(span),
            )
            .await
            .map_err(|e| Error::Internal(format!("generation task failed: {}", e)))?
        };

        match self.options.generation_timeout {
            Some(limit) => {
                let operation = format!("generation on {}", self.options.name);
                execute_with_timeout(bracket, limit, &operation).await
            }
            None => bracket.await,
        }
    }

    /// Releases the engine; later generations fail with an initialization error
    pub async fn shutdown(&self) -> Result<()> {
        if let Slot::Ready(handle) = &self.slot {
            let mut handle = handle.lock().await;
            handle.shutdown().await.map_err(|e| {
                Error::Internal(format!(
                    "failed to shut down model {}: {:#}",
                    self.options.name, e
                ))
            })?;
        }
        Ok(())
    }
}

/// One wake → generate → sleep cycle on an exclusively held handle
async fn run_bracket(
    handle: &mut ModelHandle,
    name: &str,
    prompt: &str,
    sampling: &SamplingConfig,
) -> Result<GenerationResult> {
    if handle.is_shut_down() {
        return Err(Error::Initialization(format!(
            "model {} has been shut down",
            name
        )));
    }

    if handle.power_state() != PowerState::Asleep {
        warn!("Model {} was left awake by a previous request, putting it to sleep first", name);
        handle
            .release()
            .await
            .map_err(|e| Error::generation(name, e.context("recovery sleep failed")))?;
    }

    let start = Instant::now();

    let outcome = AssertUnwindSafe(async {
        handle.wake().await?;
        handle.generate(prompt, sampling).await
    })
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| {
        Err(anyhow!(
            "inference engine panicked: {}",
            panic_message(panic.as_ref())
        ))
    });

    if let Err(sleep_err) = handle.release().await {
        error!("Failed to put model {} to sleep: {:#}", name, sleep_err);
    }

    let processing_time = start.elapsed();

    match outcome {
        Ok(completion) => {
            let tokens_generated = completion.token_count();
            info!(
                "Generated {} tokens in {} for model {}",
                tokens_generated,
                format_duration(processing_time),
                name
            );
            Ok(GenerationResult {
                text: completion.text,
                tokens_generated,
                processing_time,
            })
        }
        Err(e) => {
            error!("Error during text generation for model {}: {:#}", name, e);
            Err(Error::generation(name, e))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_engine::{EngineEvent, EngineJournal, SimulatedEngine, SimulatedEngineOptions};

    async fn simulated_manager(options: ManagerOptions) -> (ModelLifecycleManager, EngineJournal) {
        let journal = EngineJournal::default();
        let model_id = options.model_id.clone();
        let engine_journal = journal.clone();
        let manager = ModelLifecycleManager::initialize(options, async move {
            let engine = SimulatedEngine::load_with_journal(
                &model_id,
                SimulatedEngineOptions::default(),
                engine_journal,
            )
            .await?;
            Ok(Box::new(engine) as Box<dyn InferenceEngine>)
        })
        .await;
        (manager, journal)
    }

    fn qwen() -> ManagerOptions {
        ManagerOptions::new("qwen", "Qwen/Qwen2.5-7B-Instruct")
    }

    #[tokio::test]
    async fn test_initialize_puts_model_to_sleep() {
        let (manager, journal) = simulated_manager(qwen()).await;

        assert_eq!(manager.state(), LifecycleState::Asleep);
        assert_eq!(manager.power_state(), Some(PowerState::Asleep));
        assert_eq!(
            journal.events(),
            vec![
                EngineEvent::Loaded,
                EngineEvent::ResetPrefixCache,
                EngineEvent::Sleep(SleepLevel::Offload),
            ]
        );
    }

    #[tokio::test]
    async fn test_token_count_is_not_text_length() {
        let (manager, _) = simulated_manager(qwen()).await;

        let result = manager
            .generate(GenerationRequest::new("Hi. Who are you"))
            .await
            .unwrap();

        assert_eq!(result.text, "Qwen2.5-7B-Instruct answers: Hi. Who are you");
        assert_eq!(result.tokens_generated, 6);
        assert_ne!(result.tokens_generated, result.text.len());
    }

    #[tokio::test]
    async fn test_bracket_order_and_sleep_after_success() {
        let (manager, journal) = simulated_manager(qwen()).await;
        journal.clear();

        manager.generate(GenerationRequest::new("hello")).await.unwrap();

        assert_eq!(manager.power_state(), Some(PowerState::Asleep));
        assert_eq!(
            journal.events(),
            vec![
                EngineEvent::WakeUp,
                EngineEvent::Generate {
                    prompt: "hello".to_string(),
                    sampling: SamplingConfig::default(),
                },
                EngineEvent::ResetPrefixCache,
                EngineEvent::Sleep(SleepLevel::Offload),
            ]
        );
    }

    #[tokio::test]
    async fn test_sleeps_after_generation_failure() {
        let (manager, journal) = simulated_manager(qwen()).await;
        journal.set_fail_generate(true);

        let err = manager
            .generate(GenerationRequest::new("hello"))
            .await
            .unwrap_err();

        assert!(err.is_generation());
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(manager.power_state(), Some(PowerState::Asleep));
        assert_eq!(
            journal.events().last(),
            Some(&EngineEvent::Sleep(SleepLevel::Offload))
        );
    }

    #[tokio::test]
    async fn test_sleeps_after_wake_failure_and_panic() {
        let (manager, journal) = simulated_manager(qwen()).await;

        journal.set_fail_wake(true);
        let err = manager.generate(GenerationRequest::new("a")).await.unwrap_err();
        assert!(err.is_generation());
        assert_eq!(manager.power_state(), Some(PowerState::Asleep));

        journal.set_fail_wake(false);
        journal.set_panic_generate(true);
        let err = manager.generate(GenerationRequest::new("b")).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_eq!(manager.power_state(), Some(PowerState::Asleep));
    }

    #[tokio::test]
    async fn test_override_replaces_default_for_one_call() {
        let (manager, journal) = simulated_manager(qwen()).await;
        let custom = SamplingConfig::new(0.1, 0.5, 3).unwrap();

        let result = manager
            .generate(GenerationRequest::new("one two three four").with_sampling(custom))
            .await
            .unwrap();
        assert_eq!(result.tokens_generated, 3);

        manager.generate(GenerationRequest::new("again")).await.unwrap();

        let used: Vec<SamplingConfig> = journal
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Generate { sampling, .. } => Some(sampling),
                _ => None,
            })
            .collect();
        assert_eq!(used, vec![custom, SamplingConfig::default()]);
        assert_eq!(manager.default_sampling(), SamplingConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_wake_the_model() {
        let (manager, journal) = simulated_manager(qwen()).await;
        journal.clear();

        let cold = SamplingConfig {
            temperature: -0.1,
            ..SamplingConfig::default()
        };
        let err = manager
            .generate(GenerationRequest::new("hello").with_sampling(cold))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let err = manager.generate(GenerationRequest::new("")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        assert!(journal.events().is_empty());
        assert_eq!(manager.power_state(), Some(PowerState::Asleep));
    }

    #[tokio::test]
    async fn test_failed_initialization_is_terminal() {
        let options = qwen();
        let manager = ModelLifecycleManager::initialize(options, async {
            let engine = SimulatedEngine::load(
                "Qwen/Qwen2.5-7B-Instruct",
                SimulatedEngineOptions {
                    fail_load: true,
                    ..Default::default()
                },
            )
            .await?;
            Ok(Box::new(engine) as Box<dyn InferenceEngine>)
        })
        .await;

        assert!(manager.state().is_failed());
        assert_eq!(manager.power_state(), None);

        for _ in 0..2 {
            let err = manager.generate(GenerationRequest::new("hello")).await.unwrap_err();
            assert!(err.is_initialization());
        }
    }

    #[tokio::test]
    async fn test_invalid_default_sampling_fails_initialization() {
        let mut options = qwen();
        options.default_sampling.top_p = 1.5;
        let (manager, journal) = simulated_manager(options).await;

        assert!(manager.state().is_failed());
        assert!(journal.events().is_empty());
    }

    #[tokio::test]
    async fn test_sleep_failure_does_not_mask_generation_failure() {
        let (manager, journal) = simulated_manager(qwen()).await;
        journal.set_fail_generate(true);
        journal.set_fail_sleep(true);

        let err = manager.generate(GenerationRequest::new("hello")).await.unwrap_err();
        assert!(err.is_generation());
        assert!(err.to_string().contains("generation failed"));
        assert_eq!(manager.power_state(), Some(PowerState::Awake));

        // The next call first recovers the model before waking it again.
        journal.set_fail_generate(false);
        journal.set_fail_sleep(false);
        journal.clear();
        manager.generate(GenerationRequest::new("hello")).await.unwrap();

        let events = journal.events();
        assert_eq!(events[0], EngineEvent::ResetPrefixCache);
        assert_eq!(events[1], EngineEvent::Sleep(SleepLevel::Offload));
        assert_eq!(events[2], EngineEvent::WakeUp);
        assert_eq!(manager.power_state(), Some(PowerState::Asleep));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_serialized() {
        let journal = EngineJournal::default();
        let engine_journal = journal.clone();
        let manager = Arc::new(
            ModelLifecycleManager::initialize(qwen(), async move {
                let engine = SimulatedEngine::load_with_journal(
                    "Qwen/Qwen2.5-7B-Instruct",
                    SimulatedEngineOptions {
                        token_latency_ms: 2,
                        ..Default::default()
                    },
                    engine_journal,
                )
                .await?;
                Ok(Box::new(engine) as Box<dyn InferenceEngine>)
            })
            .await,
        );
        journal.clear();

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .generate(GenerationRequest::new(format!("request {}", i)))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let events = journal.events();
        assert_eq!(events.len(), 16);
        for bracket in events.chunks(4) {
            assert_eq!(bracket[0], EngineEvent::WakeUp);
            assert!(matches!(bracket[1], EngineEvent::Generate { .. }));
            assert_eq!(bracket[2], EngineEvent::ResetPrefixCache);
            assert_eq!(bracket[3], EngineEvent::Sleep(SleepLevel::Offload));
        }
    }

    #[tokio::test]
    async fn test_timeout_still_returns_model_to_sleep() {
        let journal = EngineJournal::default();
        let engine_journal = journal.clone();
        let mut options = qwen();
        options.generation_timeout = Some(Duration::from_millis(20));
        let manager = ModelLifecycleManager::initialize(options, async move {
            let engine = SimulatedEngine::load_with_journal(
                "Qwen/Qwen2.5-7B-Instruct",
                SimulatedEngineOptions {
                    token_latency_ms: 50,
                    ..Default::default()
                },
                engine_journal,
            )
            .await?;
            Ok(Box::new(engine) as Box<dyn InferenceEngine>)
        })
        .await;

        let err = manager.generate(GenerationRequest::new("slow")).await.unwrap_err();
        assert!(err.is_timeout());

        // The detached bracket completes on its own and releases the model.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(manager.power_state(), Some(PowerState::Asleep));
        assert_eq!(
            journal.events().last(),
            Some(&EngineEvent::Sleep(SleepLevel::Offload))
        );
    }

    #[tokio::test]
    async fn test_shutdown_releases_engine() {
        let (manager, journal) = simulated_manager(qwen()).await;
        manager.shutdown().await.unwrap();
        manager.shutdown().await.unwrap();

        assert_eq!(journal.count(|e| *e == EngineEvent::Shutdown), 1);
        let err = manager.generate(GenerationRequest::new("hello")).await.unwrap_err();
        assert!(err.is_initialization());
    }
}
