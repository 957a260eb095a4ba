//! Bulk adjustment of queued action states
//!
//! The caller picks the truncation policy by choosing a request; the queue
//! itself has no opinion on what to do with in-flight actions.

use rust_decimal::Decimal;
use tracing::debug;

use super::action_state::{ActionState, ExecutionState};
use super::queue::ActionStateQueue;
use crate::actions::Action;
use crate::core::accuracy::as_start_time;
use crate::core::error::Result;

/// Replacement for the action of `agents`; `None` means it was dropped
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedAction {
    pub agents: Vec<String>,
    pub action: Option<Action>,
}

impl ChangedAction {
    fn new(old: &Action, action: Option<Action>) -> Self {
        Self {
            agents: old.agents().into_iter().map(String::from).collect(),
            action,
        }
    }
}

pub trait Request {
    fn adjust(&self, queue: &mut ActionStateQueue) -> Result<Vec<ChangedAction>>;
}

/// Schedule new actions as pending states
pub struct ActionRequest {
    pub actions: Vec<Action>,
}

impl ActionRequest {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

impl Request for ActionRequest {
    fn adjust(&self, queue: &mut ActionStateQueue) -> Result<Vec<ChangedAction>> {
        queue.extend(self.actions.iter().cloned().map(ActionState::new));
        Ok(Vec::new())
    }
}

/// Several requests applied in order
#[derive(Default)]
pub struct MultiRequest {
    requests: Vec<Box<dyn Request>>,
}

impl MultiRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, request: impl Request + 'static) -> Self {
        self.requests.push(Box::new(request));
        self
    }
}

impl Request for MultiRequest {
    fn adjust(&self, queue: &mut ActionStateQueue) -> Result<Vec<ChangedAction>> {
        let mut changes = Vec::new();
        for request in &self.requests {
            changes.extend(request.adjust(queue)?);
        }
        Ok(changes)
    }
}

/// Drop actions in the given states that would still be running after `deadline`
pub struct RemoveActionsWithStateRequest {
    pub deadline: Decimal,
    pub states: Vec<ExecutionState>,
}

impl RemoveActionsWithStateRequest {
    pub fn new(deadline: Decimal, states: &[ExecutionState]) -> Self {
        Self {
            deadline,
            states: states.to_vec(),
        }
    }
}

impl Request for RemoveActionsWithStateRequest {
    fn adjust(&self, queue: &mut ActionStateQueue) -> Result<Vec<ChangedAction>> {
        let mut changes = Vec::new();
        let mut kept = Vec::new();
        for state in queue.drain() {
            if state.action.end_time() <= self.deadline || !self.states.contains(&state.state) {
                kept.push(state);
            } else {
                debug!(action = %state.action, "removing action");
                changes.push(ChangedAction::new(&state.action, None));
            }
        }
        queue.extend(kept);
        Ok(changes)
    }
}

/// Cut every action still running after `deadline` short at that point
///
/// Central plans are left alone and uninterruptible actions keep running.
/// An action that would be left with no duration is dropped.
pub struct AdjustToPartialRequest {
    pub deadline: Decimal,
}

impl AdjustToPartialRequest {
    pub fn new(deadline: Decimal) -> Self {
        Self { deadline }
    }
}

impl Request for AdjustToPartialRequest {
    fn adjust(&self, queue: &mut ActionStateQueue) -> Result<Vec<ChangedAction>> {
        let end = as_start_time(self.deadline);
        let mut changes = Vec::new();
        let mut kept = Vec::new();
        for state in queue.drain() {
            let action = &state.action;
            if action.end_time() <= self.deadline
                || matches!(action, Action::Plan(_))
                || !action.is_interruptible()
            {
                kept.push(state);
                continue;
            }

            let partial = action.as_partial(end);
            if partial.duration() <= Decimal::ZERO {
                debug!(action = %action, "dropping action that never started");
                changes.push(ChangedAction::new(action, None));
                continue;
            }
            debug!(action = %partial, "truncated to partial");
            changes.push(ChangedAction::new(action, Some(partial.clone())));
            let replacement = ActionState::new(partial);
            kept.push(if state.is_executing() {
                replacement.start()?
            } else {
                replacement
            });
        }
        queue.extend(kept);
        Ok(changes)
    }
}
