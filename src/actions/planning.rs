//! Meta actions: planning and allocation occupy simulated time like any other action

use rust_decimal::Decimal;
use serde::Serialize;

use super::{Action, Effect, Operation, Timing};
use crate::allocation::{Bid, Goal};
use crate::core::error::Result;
use crate::model::Model;

pub const PLANNER_AGENT: &str = "planner";
pub const ALLOCATOR_AGENT: &str = "allocator";

/// Central planning for every agent at once
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Plan {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub plan: Option<Vec<Action>>,
}

impl Plan {
    pub fn new(start_time: Decimal, duration: Decimal) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: PLANNER_AGENT.to_string(),
            plan: None,
        }
    }

    /// Copy carrying the planner's answer and the time it took
    pub fn with_plan(&self, plan: Option<Vec<Action>>, duration: Decimal) -> Self {
        Self {
            timing: self.timing.with_duration(duration),
            plan,
            ..self.clone()
        }
    }
}

impl Operation for Plan {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn is_applicable(&self, _model: &Model) -> bool {
        true
    }

    fn apply(&self, _model: &mut Model) -> Result<Effect> {
        Ok(Effect::Plan(self.plan.clone().unwrap_or_default()))
    }
}

/// One agent planning for the goals it won
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LocalPlan {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub goals: Vec<Goal>,
    pub plan: Option<Vec<Action>>,
    pub failed: bool,
}

impl LocalPlan {
    pub fn new(start_time: Decimal, duration: Decimal, agent: &str, goals: Vec<Goal>) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            goals,
            plan: None,
            failed: false,
        }
    }

    /// Copy carrying the planner's answer; a missing plan marks the action failed
    pub fn with_plan(&self, plan: Option<Vec<Action>>, duration: Decimal) -> Self {
        Self {
            timing: self.timing.with_duration(duration),
            failed: plan.is_none(),
            plan,
            ..self.clone()
        }
    }
}

impl Operation for LocalPlan {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn is_applicable(&self, _model: &Model) -> bool {
        true
    }

    fn apply(&self, _model: &mut Model) -> Result<Effect> {
        Ok(Effect::Plan(self.plan.clone().unwrap_or_default()))
    }
}

/// Market allocation of outstanding tasks to agents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Allocate {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub allocation: Vec<Bid>,
}

impl Allocate {
    pub fn new(start_time: Decimal, duration: Decimal) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: ALLOCATOR_AGENT.to_string(),
            allocation: Vec::new(),
        }
    }

    pub fn with_allocation(&self, allocation: Vec<Bid>, duration: Decimal) -> Self {
        Self {
            timing: self.timing.with_duration(duration),
            allocation,
            ..self.clone()
        }
    }
}

impl Operation for Allocate {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn is_applicable(&self, _model: &Model) -> bool {
        true
    }

    fn apply(&self, _model: &mut Model) -> Result<Effect> {
        Ok(Effect::Allocation(self.allocation.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Move;

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[test]
    fn test_plan_returns_its_payload() {
        let plan = vec![Action::Move(Move::new(d(0), d(2), "agent1", "a", "b"))];
        let action = Plan::new(d(1), d(10)).with_plan(Some(plan.clone()), d(3));
        assert_eq!(action.timing.duration(), d(3));
        let mut model = Model::new("janitor");
        assert_eq!(Action::Plan(action).apply(&mut model).unwrap(), Effect::Plan(plan));
    }

    #[test]
    fn test_local_plan_without_plan_is_failed() {
        let action = LocalPlan::new(d(1), d(10), "agent1", Vec::new()).with_plan(None, d(10));
        assert!(action.failed);
        let mut model = Model::new("janitor");
        assert_eq!(
            Action::LocalPlan(action).apply(&mut model).unwrap(),
            Effect::Plan(Vec::new())
        );
    }

    #[test]
    fn test_planning_actions_are_not_interruptible() {
        let action = Action::Allocate(Allocate::new(d(1), d(2)));
        assert_eq!(action.as_partial(d(2)), action);
        assert!(action.is_planning());
        assert!(!action.is_physical());
    }
}
