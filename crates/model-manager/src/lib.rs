//! Model lifecycle management for LLM Serve
//!
//! This crate keeps each served model asleep between requests and runs every
//! generation inside a serialized wake → generate → sleep bracket.

pub mod handle;
pub mod lifecycle;
pub mod state;

// Re-export commonly used types
pub use handle::ModelHandle;
pub use lifecycle::{ManagerOptions, ModelLifecycleManager};
pub use state::LifecycleState;
