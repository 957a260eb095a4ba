//! Execution state machine for a scheduled action

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::actions::Action;
use crate::core::error::{Result, SimError};

/// Position of an action in its lifecycle
///
/// Declared so that `PreStart` sorts last among equal times: actions that
/// finish at an instant settle before any action starts at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Finished,
    Executing,
    PreStart,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Finished => "finished",
            ExecutionState::Executing => "executing",
            ExecutionState::PreStart => "pre_start",
        };
        f.write_str(name)
    }
}

/// An action with its next event time and execution state
///
/// Field order is the queue order: time, then state, then the action itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionState {
    pub time: Decimal,
    pub state: ExecutionState,
    pub action: Action,
}

impl ActionState {
    /// Pending action, scheduled at its start time
    pub fn new(action: Action) -> Self {
        Self {
            time: action.start_time(),
            state: ExecutionState::PreStart,
            action,
        }
    }

    /// Mark as started; the state now stands for the action's completion event
    pub fn start(&self) -> Result<ActionState> {
        if self.state != ExecutionState::PreStart {
            return Err(self.illegal("start"));
        }
        debug!(action = %self.action, "starting");
        Ok(ActionState {
            time: self.action.end_time(),
            state: ExecutionState::Executing,
            action: self.action.clone(),
        })
    }

    pub fn finish(&self) -> Result<ActionState> {
        if self.state != ExecutionState::Executing {
            return Err(self.illegal("finish"));
        }
        debug!(action = %self.action, "finishing");
        Ok(ActionState {
            time: self.time,
            state: ExecutionState::Finished,
            action: self.action.clone(),
        })
    }

    pub fn is_executing(&self) -> bool {
        self.state == ExecutionState::Executing
    }

    fn illegal(&self, transition: &'static str) -> SimError {
        SimError::ExecutionState {
            transition,
            state: self.state.to_string(),
            action: self.action.to_string(),
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActionState(time={}, state={}, action={})",
            self.time, self.state, self.action
        )
    }
}
