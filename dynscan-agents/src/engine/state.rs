//! Run state machine.
//!
//! ```text
//! Preparing -> Identifying -> Exploring -> Aggregating -> Completed
//!     |             |             |             |
//!     +-------------+-------------+-------------+--> Failed -> Completed
//! ```
//!
//! `Failed` is internal: a failed run still completes with the conservative
//! verdict.

use serde::Serialize;
use thiserror::Error;

use crate::contracts::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Preparing,
    Identifying,
    Exploring,
    Aggregating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Invalid run state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Preparing, Identifying)
                | (Identifying, Exploring)
                | (Exploring, Aggregating)
                | (Aggregating, Completed)
                | (Preparing | Identifying | Exploring | Aggregating, Failed)
                | (Failed, Completed)
        )
    }

    pub fn transition(self, next: RunState) -> Result<RunState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == RunState::Completed
    }

    /// Stage whose records this state produces.
    pub fn stage(self) -> Option<Stage> {
        match self {
            RunState::Preparing => Some(Stage::Preparation),
            RunState::Identifying => Some(Stage::Identification),
            RunState::Exploring => Some(Stage::Exploration),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Preparing => "preparing",
            RunState::Identifying => "identifying",
            RunState::Exploring => "exploring",
            RunState::Aggregating => "aggregating",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = RunState::Preparing
            .transition(RunState::Identifying)
            .and_then(|s| s.transition(RunState::Exploring))
            .and_then(|s| s.transition(RunState::Aggregating))
            .and_then(|s| s.transition(RunState::Completed))
            .unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failure_resolves_to_completed() {
        let state = RunState::Identifying.transition(RunState::Failed).unwrap();
        assert_eq!(state.transition(RunState::Completed).unwrap(), RunState::Completed);
    }

    #[test]
    fn test_rejects_skips_and_restarts() {
        assert!(RunState::Preparing.transition(RunState::Exploring).is_err());
        assert!(RunState::Completed.transition(RunState::Preparing).is_err());
        assert!(RunState::Completed.transition(RunState::Failed).is_err());
    }
}
