//! Inference engine collaborators for LLM Serve
//!
//! This crate defines the narrow contract the lifecycle manager relies on
//! (load, wake, generate, reset cache, sleep) and two implementations:
//! an in-process simulated engine and a client for a vLLM server running
//! with sleep mode enabled.

pub mod engine;
pub mod remote;
pub mod simulated;

// Re-export commonly used types
pub use engine::{Completion, InferenceEngine};
pub use remote::{RemoteEngine, RemoteEngineOptions};
pub use simulated::{EngineEvent, EngineJournal, SimulatedEngine, SimulatedEngineOptions};
