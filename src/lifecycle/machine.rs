//! Immutable lifecycle state value

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::MrState;
use crate::lifecycle::transitions::allowed_targets;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: MrState, to: MrState },
}

/// A lifecycle state. Transitions produce a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LifecycleState(MrState);

impl Default for LifecycleState {
    fn default() -> Self {
        Self(MrState::PendingReview)
    }
}

impl From<MrState> for LifecycleState {
    fn from(state: MrState) -> Self {
        Self(state)
    }
}

impl LifecycleState {
    pub fn new(state: MrState) -> Self {
        Self(state)
    }

    pub fn state(&self) -> MrState {
        self.0
    }

    pub fn is_terminal(&self) -> bool {
        self.0.is_terminal()
    }

    pub fn allowed_targets(&self) -> &'static [MrState] {
        allowed_targets(self.0)
    }

    /// Check if a transition is valid (without performing it)
    pub fn can_transition_to(&self, target: MrState) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn transition_to(&self, target: MrState) -> Result<LifecycleState, TransitionError> {
        if !self.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: self.0,
                to: target,
            });
        }
        Ok(LifecycleState(target))
    }
}
