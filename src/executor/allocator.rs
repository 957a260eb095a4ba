//! Market coordinator: auctions outstanding goals, then lets winners plan locally

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::agent::{AgentBidder, AgentExecutor};
use super::Context;
use crate::actions::{Action, Allocate, LocalPlan};
use crate::allocation::{compute_allocation, Goal};
use crate::core::accuracy::{as_start_time, INSTANTANEOUS_ACTION_DURATION};
use crate::core::error::{Result, SimError};
use crate::execution::ActionState;
use crate::model::{Event, GoalAchievement, Model};

#[derive(Debug, Clone, PartialEq)]
pub struct TaskAllocatorExecutor {
    executing: Option<ActionState>,
    /// Agents hold plans for the current allocation
    plan_valid: bool,
    /// Outstanding goals may still be achievable; cleared when an auction cannot help
    valid_goals: bool,
    /// Achievement when the last auction started
    last_achievement: Option<GoalAchievement>,
    new_knowledge: bool,
}

impl Default for TaskAllocatorExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskAllocatorExecutor {
    pub fn new() -> Self {
        Self {
            executing: None,
            plan_valid: false,
            valid_goals: true,
            last_achievement: None,
            new_knowledge: false,
        }
    }

    pub fn is_plan_valid(&self) -> bool {
        self.plan_valid
    }

    pub fn executing(&self) -> Option<&ActionState> {
        self.executing.as_ref()
    }

    pub fn has_goals(&self, model: &Model, context: &Context, agents_idle: bool, time: Decimal) -> bool {
        if self.executing.is_some() {
            return true;
        }
        self.valid_goals
            && (!self.plan_valid || agents_idle)
            && !context.domain.compute_tasks(model, time).is_empty()
    }

    pub fn next_action(&self, time: Decimal) -> ActionState {
        match &self.executing {
            Some(executing) => executing.clone(),
            None => ActionState::new(Action::Allocate(Allocate::new(
                as_start_time(time),
                INSTANTANEOUS_ACTION_DURATION,
            ))),
        }
    }

    /// Run the auction over halted agents
    ///
    /// The `Allocate` action lasts as long as the auction's simulated
    /// computation time.
    pub fn notify_action_starting(
        &mut self,
        state: &ActionState,
        agents: &mut BTreeMap<String, AgentExecutor>,
        model: &Model,
        context: &Context,
        events: &[Event],
    ) -> Result<()> {
        let Action::Allocate(allocate) = &state.action else {
            return Err(SimError::InvalidModel(format!(
                "task allocator cannot start {}",
                state.action
            )));
        };
        let time = state.time;

        let achievement = model.goal_achievement();
        let stuck = self.last_achievement == Some(achievement) && !self.new_knowledge;
        self.last_achievement = Some(achievement);
        self.new_knowledge = false;

        let hypothesis = model.hypothesis();
        let tasks = if stuck {
            warn!(%time, "no progress since the last allocation, waiting for new knowledge");
            Vec::new()
        } else {
            context.domain.compute_tasks(&hypothesis, time)
        };

        let mut bidders: Vec<AgentBidder> = agents
            .values_mut()
            .map(|executor| AgentBidder {
                executor,
                model: &hypothesis,
                context,
                time,
                events,
            })
            .collect();
        let allocation = compute_allocation(tasks, &mut bidders, |task| context.domain.task_key(task))?;

        if allocation.is_empty() {
            info!(%time, "nothing allocated, goals unreachable until new knowledge arrives");
            self.valid_goals = false;
        }
        let duration = allocation.computation_time.max(INSTANTANEOUS_ACTION_DURATION);
        let action = Action::Allocate(allocate.with_allocation(allocation.bids, duration));
        self.executing = Some(ActionState::new(action).start()?);
        Ok(())
    }

    /// Give every winner a `LocalPlan` for the goals it won
    ///
    /// Winners whose bids need other agents' work plan one budget later, so
    /// the plans they depend on are published first.
    pub fn notify_action_finishing(
        &mut self,
        state: &ActionState,
        agents: &mut BTreeMap<String, AgentExecutor>,
        context: &Context,
    ) {
        self.executing = None;
        self.plan_valid = true;
        let Action::Allocate(allocate) = &state.action else {
            return;
        };

        let planning_time = context.config.planning_time;
        let start = as_start_time(state.time);
        let mut won: BTreeMap<&str, (Vec<Goal>, bool)> = BTreeMap::new();
        for bid in &allocate.allocation {
            let entry = won.entry(bid.agent.as_str()).or_default();
            entry.0.push(bid.task.goal.clone());
            entry.1 |= !bid.requirements.is_empty();
        }

        for (agent, (goals, dependent)) in won {
            let Some(executor) = agents.get_mut(agent) else {
                warn!(%agent, "allocation names an unknown agent");
                continue;
            };
            let at = if dependent { start + planning_time } else { start };
            info!(%agent, goals = goals.len(), start = %at, "local planning scheduled");
            executor.set_plan(vec![Action::LocalPlan(LocalPlan::new(
                at,
                planning_time,
                agent,
                goals,
            ))]);
        }
    }

    pub fn notify_new_knowledge(&mut self) {
        self.new_knowledge = true;
        self.valid_goals = true;
    }

    pub fn invalidate(&mut self) {
        self.plan_valid = false;
    }
}
