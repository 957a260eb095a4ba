//! Central coordinator: one planner producing a joint plan for every agent

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::agent::AgentExecutor;
use super::Context;
use crate::actions::{Action, Owner, Plan};
use crate::allocation::Goal;
use crate::core::accuracy::as_start_time;
use crate::core::config::ReplanPolicy;
use crate::core::error::{Result, SimError};
use crate::execution::ActionState;
use crate::model::{Event, GoalAchievement, Model};
use crate::planner::{adjust_plan, PlanRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct CentralPlannerExecutor {
    executing: Option<ActionState>,
    plan_valid: bool,
    valid_goals: bool,
    replan_policy: ReplanPolicy,
    last_achievement: Option<GoalAchievement>,
    new_knowledge: bool,
}

impl CentralPlannerExecutor {
    pub fn new(replan_policy: ReplanPolicy) -> Self {
        Self {
            executing: None,
            plan_valid: false,
            valid_goals: true,
            replan_policy,
            last_achievement: None,
            new_knowledge: false,
        }
    }

    pub fn replan_policy(&self) -> ReplanPolicy {
        self.replan_policy
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

    /// A planning window of the configured budget starting at `time`
    pub fn next_action(&self, context: &Context, time: Decimal) -> ActionState {
        match &self.executing {
            Some(executing) => executing.clone(),
            None => ActionState::new(Action::Plan(Plan::new(
                as_start_time(time),
                context.config.planning_time,
            ))),
        }
    }

    /// Plan for every agent on `predicted`, the world as it will be when the window closes
    ///
    /// The window keeps its full length whatever the planner took, since the
    /// plan is laid out from the window's end.
    pub fn notify_action_starting(
        &mut self,
        state: &ActionState,
        model: &Model,
        predicted: &Model,
        context: &Context,
        events: &[Event],
    ) -> Result<()> {
        let Action::Plan(window) = &state.action else {
            return Err(SimError::InvalidModel(format!(
                "central planner cannot start {}",
                state.action
            )));
        };
        let origin = as_start_time(state.action.end_time());

        let achievement = model.goal_achievement();
        let stuck = self.last_achievement == Some(achievement) && !self.new_knowledge;
        self.last_achievement = Some(achievement);
        self.new_knowledge = false;

        let plan = if stuck {
            warn!(time = %state.time, "no progress since the last plan, waiting for new knowledge");
            None
        } else {
            let goals: Vec<Goal> = context
                .domain
                .compute_tasks(predicted, origin)
                .into_iter()
                .map(|task| task.goal)
                .collect();
            let outcome = context.planner.get_plan(&PlanRequest {
                model: predicted,
                agent: None,
                goals: &goals,
                metric: predicted.metric.as_ref(),
                planning_time: context.config.planning_time,
                origin,
                events,
            })?;
            info!(
                goals = goals.len(),
                found = outcome.plan.is_some(),
                time_taken = %outcome.time_taken,
                %origin,
                "central plan"
            );
            outcome.plan
        };

        if plan.is_none() {
            self.valid_goals = false;
        }
        let action = Action::Plan(window.with_plan(plan, window.timing.duration()));
        self.executing = Some(ActionState::new(action).start()?);
        Ok(())
    }

    /// Hand every agent its share of the joint plan
    pub fn notify_action_finishing(
        &mut self,
        state: &ActionState,
        agents: &mut BTreeMap<String, AgentExecutor>,
    ) {
        self.executing = None;
        let Action::Plan(window) = &state.action else {
            return;
        };
        let Some(plan) = &window.plan else {
            self.plan_valid = false;
            return;
        };

        let origin = as_start_time(state.time);
        let mut parts: BTreeMap<String, Vec<Action>> = BTreeMap::new();
        for action in plan {
            match action.owner() {
                Owner::Agent(agent) => parts.entry(agent).or_default().push(action.clone()),
                _ => warn!(action = %action, "plan step without an agent"),
            }
        }
        for (agent, part) in parts {
            match agents.get_mut(&agent) {
                Some(executor) => executor.set_plan(adjust_plan(part, origin)),
                None => warn!(%agent, "plan names an unknown agent"),
            }
        }
        self.plan_valid = true;
    }

    pub fn notify_new_knowledge(&mut self) {
        self.new_knowledge = true;
        self.valid_goals = true;
    }

    pub fn invalidate(&mut self, planning_failed: bool) {
        self.plan_valid = false;
        if planning_failed {
            self.valid_goals = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulationConfig;
    use crate::domain;
    use crate::model::{Fact, Graph, WorldObject};
    use crate::planner::HeuristicPlanner;
    use std::sync::Arc;

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn context() -> Context {
        let domain = domain::for_name("janitor").unwrap();
        let planner = Arc::new(HeuristicPlanner::new(domain.clone(), Decimal::ONE));
        Context::new(domain, planner, SimulationConfig::default())
    }

    /// rm1 -1- rm2, both agents at rm1, rm2 dirty
    fn model() -> Model {
        let mut model = Model::new("janitor")
            .with_object("agent", "agent1", WorldObject::new().with_fact("at", Fact::located("rm1")))
            .with_object("agent", "agent2", WorldObject::new().with_fact("at", Fact::located("rm1")))
            .with_object("room", "rm1", WorldObject::new())
            .with_object(
                "room",
                "rm2",
                WorldObject::new()
                    .with_fact("dirty", true)
                    .with_fact("dirtiness", d(3)),
            )
            .with_goal(&["cleaned", "rm2"]);
        model.graph = Graph::new().with_edge("rm1", "rm2", d(1));
        model.graph.bidirectional = true;
        model
    }

    fn agents() -> BTreeMap<String, AgentExecutor> {
        ["agent1", "agent2"]
            .into_iter()
            .map(|a| (a.to_string(), AgentExecutor::new(a)))
            .collect()
    }

    #[test]
    fn test_joint_plan_starts_when_window_closes() {
        let context = context();
        let model = model();
        let mut agents = agents();
        let mut planner = CentralPlannerExecutor::new(ReplanPolicy::Partial);
        assert!(planner.has_goals(&model, &context, true, Decimal::ZERO));

        let pending = planner.next_action(&context, Decimal::ZERO);
        planner
            .notify_action_starting(&pending, &model, &model, &context, &[])
            .unwrap();
        let running = planner.executing().unwrap().clone();
        assert_eq!(running.action.duration(), context.config.planning_time);

        let finished = running.finish().unwrap();
        planner.notify_action_finishing(&finished, &mut agents);
        assert!(planner.is_plan_valid());

        let first = agents["agent1"].next_action().unwrap();
        assert!(matches!(first.action, Action::Move(_)));
        assert_eq!(first.time, d(10));
        // One agent is enough for a plain clean
        assert!(agents["agent2"].next_action().is_none());
    }

    #[test]
    fn test_planning_failure_waits_for_new_knowledge() {
        let context = context();
        let mut model = model();
        model.graph = Graph::new();
        let mut planner = CentralPlannerExecutor::new(ReplanPolicy::Finish);

        let pending = planner.next_action(&context, Decimal::ZERO);
        planner
            .notify_action_starting(&pending, &model, &model, &context, &[])
            .unwrap();
        let finished = planner.executing().unwrap().finish().unwrap();
        planner.notify_action_finishing(&finished, &mut agents());

        assert!(!planner.is_plan_valid());
        assert!(!planner.has_goals(&model, &context, true, Decimal::ZERO));
        planner.notify_new_knowledge();
        assert!(planner.has_goals(&model, &context, true, Decimal::ZERO));
    }

    #[test]
    fn test_invalidation_after_failed_planning_drops_goals() {
        let context = context();
        let model = model();
        let mut planner = CentralPlannerExecutor::new(ReplanPolicy::Partial);
        planner.invalidate(false);
        assert!(planner.has_goals(&model, &context, false, Decimal::ZERO));
        planner.invalidate(true);
        assert!(!planner.has_goals(&model, &context, false, Decimal::ZERO));
    }
}
