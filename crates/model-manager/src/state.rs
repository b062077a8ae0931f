//! Lifecycle state of a managed model
//!
//! Tracks where a lifecycle manager sits in its
//! `Uninitialized → Asleep ⇄ Awake` cycle, or whether it failed to load.

use std::fmt;

use serde::{Deserialize, Serialize};

use common::PowerState;

/// Represents the current state of a lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Model is being constructed
    Uninitialized,

    /// Model is loaded and in low-power mode
    Asleep,

    /// Model is serving a generation request
    Awake,

    /// Model failed to load; terminal
    Failed(String),
}

impl LifecycleState {
    /// Creates a new lifecycle state
    pub fn new() -> Self {
        LifecycleState::Uninitialized
    }

    /// Returns true if `next` is a legal successor of this state
    ///
    /// `Awake → Awake` is rejected: every generation is its own bracket.
    pub fn can_transition_to(&self, next: &LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, next),
            (Uninitialized, Asleep)
                | (Uninitialized, Failed(_))
                | (Asleep, Awake)
                | (Awake, Asleep)
        )
    }

    /// Returns true if the model is asleep
    pub fn is_asleep(&self) -> bool {
        matches!(self, LifecycleState::Asleep)
    }

    /// Returns true if the model is awake
    pub fn is_awake(&self) -> bool {
        matches!(self, LifecycleState::Awake)
    }

    /// Returns true if the model failed to load
    pub fn is_failed(&self) -> bool {
        matches!(self, LifecycleState::Failed(_))
    }

    /// Gets the failure reason if in failed state
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            LifecycleState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<PowerState> for LifecycleState {
    fn from(power_state: PowerState) -> Self {
        match power_state {
            PowerState::Awake => LifecycleState::Awake,
            PowerState::Asleep => LifecycleState::Asleep,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "Uninitialized"),
            LifecycleState::Asleep => write!(f, "Asleep"),
            LifecycleState::Awake => write!(f, "Awake"),
            LifecycleState::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}
