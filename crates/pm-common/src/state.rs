//! Sampling thread state machine.
//!
//! `INITIALIZING → RUNNING → CANCELLED`. Cancellation is terminal and may
//! also be observed before the loop ever starts running.

use crate::error::{PmError, PmResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the sampling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProducerState {
    /// Configuring real-time priority and pre-faulting the stack.
    #[default]
    Initializing,
    /// Sampling loop is active.
    Running,
    /// Cancellation was observed; the loop has exited.
    Cancelled,
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl ProducerState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: ProducerState) -> bool {
        use ProducerState::{Cancelled, Initializing, Running};

        matches!(
            (self, target),
            (Initializing, Running) | (Initializing, Cancelled) | (Running, Cancelled)
        )
    }

    /// Returns true once the loop can no longer sample.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// State machine wrapper that rejects invalid transitions.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: ProducerState,
    previous: Option<ProducerState>,
}

impl StateMachine {
    /// Create a new state machine starting in INITIALIZING.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ProducerState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<ProducerState> {
        self.previous
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::InvalidStateTransition`] if the transition is not allowed.
    pub fn transition(&mut self, target: ProducerState) -> PmResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            Ok(())
        } else {
            Err(PmError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Enter CANCELLED from any non-terminal state.
    pub fn cancel(&mut self) {
        if self.current.can_transition_to(ProducerState::Cancelled) {
            self.previous = Some(self.current);
            self.current = ProducerState::Cancelled;
        }
    }
}
