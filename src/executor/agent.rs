//! Per-agent executor: runs a plan, plans locally, and bids for tasks

use std::collections::VecDeque;

use rust_decimal::Decimal;
use tracing::{debug, info};

use super::{Context, Signal};
use crate::actions::{Action, Effect, LocalPlan};
use crate::allocation::{Bid, Bidder, Task};
use crate::core::accuracy::{as_start_time, INSTANTANEOUS_ACTION_DURATION};
use crate::core::error::Result;
use crate::domain::BidRequest;
use crate::execution::ActionState;
use crate::model::{Event, Model};
use crate::planner::{adjust_plan, PlanRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct AgentExecutor {
    pub agent: String,
    plan: VecDeque<Action>,
    executing: Option<ActionState>,
    stalled: bool,
    /// Bids won in the current allocation, in award order
    won_bids: Vec<Bid>,
}

impl AgentExecutor {
    pub fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            plan: VecDeque::new(),
            executing: None,
            stalled: false,
            won_bids: Vec::new(),
        }
    }

    pub fn has_goals(&self) -> bool {
        !self.stalled && (self.executing.is_some() || !self.plan.is_empty())
    }

    pub fn is_idle(&self) -> bool {
        !self.has_goals()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn plan(&self) -> impl Iterator<Item = &Action> {
        self.plan.iter()
    }

    pub fn executing(&self) -> Option<&ActionState> {
        self.executing.as_ref()
    }

    pub fn won_bids(&self) -> &[Bid] {
        &self.won_bids
    }

    pub fn set_plan(&mut self, plan: Vec<Action>) {
        debug!(agent = %self.agent, actions = plan.len(), "new plan");
        self.plan = plan.into();
    }

    /// The executing state, or the first planned action waiting to start
    pub fn next_action(&self) -> Option<ActionState> {
        if self.stalled {
            return None;
        }
        if let Some(executing) = &self.executing {
            return Some(executing.clone());
        }
        self.plan.front().cloned().map(ActionState::new)
    }

    /// Start the first planned action
    ///
    /// A `LocalPlan` runs the planner here. The plan it returns starts once the
    /// planning budget is spent, so it is shifted to absolute time right away.
    pub fn notify_action_starting(
        &mut self,
        state: &ActionState,
        model: &Model,
        context: &Context,
        events: &[Event],
    ) -> Result<()> {
        self.plan.pop_front();
        let started = match &state.action {
            Action::LocalPlan(local) => {
                ActionState::new(Action::LocalPlan(self.plan_locally(local, model, context, events)?))
                    .start()?
            }
            _ => state.start()?,
        };
        self.executing = Some(started);
        Ok(())
    }

    fn plan_locally(
        &self,
        local: &LocalPlan,
        model: &Model,
        context: &Context,
        events: &[Event],
    ) -> Result<LocalPlan> {
        let budget = local.timing.duration();
        let origin = as_start_time(local.timing.start_time() + budget);
        let view = context.domain.transform_model_for_planning(
            &model.hypothesis(),
            &self.agent,
            &local.goals,
        );
        let outcome = context.planner.get_plan(&PlanRequest {
            model: &view,
            agent: Some(&self.agent),
            goals: &local.goals,
            metric: None,
            planning_time: budget,
            origin,
            events,
        })?;
        // The plan is laid out from the end of the budget, so planning never overruns it
        let duration = outcome.time_taken.clamp(INSTANTANEOUS_ACTION_DURATION, budget);
        info!(
            agent = %self.agent,
            goals = local.goals.len(),
            found = outcome.plan.is_some(),
            time_taken = %outcome.time_taken,
            "local plan"
        );
        Ok(local.with_plan(outcome.plan.map(|plan| adjust_plan(plan, origin)), duration))
    }

    pub fn notify_action_finishing(
        &mut self,
        state: &ActionState,
        _effect: &Effect,
        context: &Context,
    ) -> Vec<Signal> {
        self.executing = None;
        let Action::LocalPlan(local) = &state.action else {
            return Vec::new();
        };
        let time = as_start_time(state.time);
        match &local.plan {
            Some(plan) if !local.failed => {
                self.set_plan(plan.clone());
                let events = context.domain.extract_events(plan, &local.goals);
                if events.is_empty() {
                    Vec::new()
                } else {
                    vec![Signal::GoalRealisation {
                        agent: self.agent.clone(),
                        events,
                    }]
                }
            }
            _ => vec![Signal::PlanningFailure {
                agent: self.agent.clone(),
                time,
            }],
        }
    }

    /// Stop following the plan at `time`
    ///
    /// An executing action that finishes by `time` is left to finish. Other
    /// interruptible actions are cut short at `time`; local planning is
    /// abandoned.
    pub fn halt(&mut self, time: Decimal) {
        debug!(agent = %self.agent, %time, "halting");
        self.plan.clear();
        self.won_bids.clear();
        self.stalled = false;

        let Some(state) = self.executing.take() else {
            return;
        };
        let action = &state.action;
        if action.is_planning() && action.end_time() > time {
            debug!(agent = %self.agent, "abandoning local planning");
            return;
        }
        if action.end_time() <= time || !action.is_interruptible() {
            self.executing = Some(state);
            return;
        }
        let end = as_start_time(time);
        if action.start_time() >= end {
            debug!(agent = %self.agent, action = %action, "dropping action that just started");
            return;
        }
        let partial = action.as_partial(end);
        match ActionState::new(partial).start() {
            Ok(started) => self.executing = Some(started),
            Err(e) => debug!(agent = %self.agent, error = %e, "cannot truncate action"),
        }
    }

    /// `ReplanRequired` when any remaining action depends on a changed id
    pub fn notify_new_knowledge(&self, ids: &[String], time: Decimal) -> Option<Signal> {
        let affected = self
            .executing
            .iter()
            .map(|s| &s.action)
            .chain(self.plan.iter())
            .any(|action| ids.iter().any(|id| action.is_affected_by_change(id)));
        affected.then(|| Signal::ReplanRequired {
            agent: self.agent.clone(),
            time,
        })
    }

    pub fn stall(&mut self) {
        self.stalled = true;
        self.executing = None;
    }

    /// Remove and return the executing state and every planned action
    pub fn take_in_flight(&mut self) -> Vec<ActionState> {
        self.won_bids.clear();
        self.executing
            .take()
            .into_iter()
            .chain(self.plan.drain(..).map(ActionState::new))
            .collect()
    }

    /// Continue executing `state` with no plan after it
    pub fn resume(&mut self, state: ActionState) {
        self.executing = Some(state);
    }

    /// Copy that only finishes what it is already doing
    pub fn executing_only(&self) -> Self {
        Self {
            agent: self.agent.clone(),
            plan: VecDeque::new(),
            executing: self.executing.clone(),
            stalled: false,
            won_bids: Vec::new(),
        }
    }
}

/// An agent taking part in an auction
pub struct AgentBidder<'a> {
    pub executor: &'a mut AgentExecutor,
    pub model: &'a Model,
    pub context: &'a Context,
    pub time: Decimal,
    pub events: &'a [Event],
}

impl Bidder for AgentBidder<'_> {
    fn name(&self) -> &str {
        &self.executor.agent
    }

    fn generate_bid(&mut self, task: &Task) -> Result<Option<Bid>> {
        let request = BidRequest {
            model: self.model,
            agent: &self.executor.agent,
            won_bids: &self.executor.won_bids,
            planner: self.context.planner.as_ref(),
            time: self.time,
            planning_time: self.context.config.planning_time,
            events: self.events,
        };
        self.context.domain.generate_bid(&request, task)
    }

    fn notify_bid_won(&mut self, bid: &Bid) {
        self.executor.won_bids.push(bid.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Clean, Move, Observe};
    use crate::allocation::Goal;
    use crate::core::config::SimulationConfig;
    use crate::core::types::Deadline;
    use crate::domain;
    use crate::execution::ExecutionState;
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

    fn model() -> Model {
        let mut model = Model::new("janitor")
            .with_object("agent", "agent1", WorldObject::new().with_fact("at", Fact::located("rm1")))
            .with_object("room", "rm1", WorldObject::new())
            .with_object(
                "room",
                "rm2",
                WorldObject::new()
                    .with_fact("dirty", true)
                    .with_fact("dirtiness", d(4)),
            )
            .with_goal(&["cleaned", "rm2"]);
        model.graph = Graph::new().with_edge("rm1", "rm2", d(2));
        model.graph.bidirectional = true;
        model
    }

    fn cleaned(room: &str) -> Goal {
        Goal::new(vec!["cleaned".into(), room.into()], Deadline::Never)
    }

    fn executing(action: Action) -> ActionState {
        ActionState::new(action).start().unwrap()
    }

    #[test]
    fn test_local_plan_starts_after_budget() {
        let context = context();
        let model = model();
        let mut agent = AgentExecutor::new("agent1");
        agent.set_plan(vec![Action::LocalPlan(LocalPlan::new(d(5), d(10), "agent1", vec![cleaned("rm2")]))]);

        let pending = agent.next_action().unwrap();
        agent.notify_action_starting(&pending, &model, &context, &[]).unwrap();

        let running = agent.executing().unwrap().clone();
        let Action::LocalPlan(local) = &running.action else {
            panic!("expected a local plan");
        };
        assert_eq!(local.timing.duration(), Decimal::ONE);
        let plan = local.plan.clone().unwrap();
        let names: Vec<_> = plan.iter().map(|a| a.type_name()).collect();
        assert_eq!(names, vec!["Move", "Observe", "Clean"]);
        assert_eq!(plan[0].start_time(), d(15));

        let finished = running.finish().unwrap();
        let signals = agent.notify_action_finishing(&finished, &Effect::Plan(plan.clone()), &context);
        assert!(signals.is_empty());
        assert_eq!(agent.next_action().unwrap().action, plan[0]);
    }

    #[test]
    fn test_failed_local_plan_signals_coordinator() {
        let context = context();
        let mut model = model();
        // Dirty but cut off from every other room
        model.insert_object(
            "room",
            "rm9",
            WorldObject::new().with_fact("dirty", true).with_fact("dirtiness", d(1)),
        );
        let mut agent = AgentExecutor::new("agent1");
        agent.set_plan(vec![Action::LocalPlan(LocalPlan::new(d(0), d(10), "agent1", vec![cleaned("rm9")]))]);

        let pending = agent.next_action().unwrap();
        agent.notify_action_starting(&pending, &model, &context, &[]).unwrap();
        let finished = agent.executing().unwrap().finish().unwrap();
        let signals = agent.notify_action_finishing(&finished, &Effect::Plan(Vec::new()), &context);

        assert_eq!(
            signals,
            vec![Signal::PlanningFailure {
                agent: "agent1".into(),
                time: Decimal::ONE,
            }]
        );
        assert!(agent.is_idle());
    }

    #[test]
    fn test_halt_truncates_interruptible_action() {
        let mut agent = AgentExecutor::new("agent1");
        agent.executing = Some(executing(Action::Move(Move::new(d(0), d(4), "agent1", "a", "b"))));
        agent.plan.push_back(Action::Clean(Clean::new(d(4), d(2), "agent1", "b")));

        agent.halt(d(1));

        let state = agent.executing().unwrap();
        assert_eq!(state.state, ExecutionState::Executing);
        assert!(state.action.is_partial());
        assert_eq!(state.action.duration(), d(1));
        assert_eq!(agent.plan().count(), 0);
    }

    #[test]
    fn test_halt_keeps_action_finishing_now() {
        let mut agent = AgentExecutor::new("agent1");
        let observe = executing(Action::Observe(Observe::new(d(2), "agent1", "b")));
        agent.executing = Some(observe.clone());

        agent.halt(d(2));

        assert_eq!(agent.executing(), Some(&observe));
    }

    #[test]
    fn test_halt_drops_action_started_at_halt_time() {
        let mut agent = AgentExecutor::new("agent1");
        agent.executing = Some(executing(Action::Move(Move::new(d(3), d(4), "agent1", "a", "b"))));

        agent.halt(d(3));

        assert!(agent.executing().is_none());
        assert!(agent.is_idle());
    }

    #[test]
    fn test_halt_abandons_local_planning() {
        let mut agent = AgentExecutor::new("agent1");
        agent.executing = Some(executing(Action::LocalPlan(LocalPlan::new(d(0), d(10), "agent1", Vec::new()))));

        agent.halt(d(3));

        assert!(agent.executing().is_none());
    }

    #[test]
    fn test_new_knowledge_on_planned_route() {
        let mut agent = AgentExecutor::new("agent1");
        agent.set_plan(vec![Action::Move(Move::new(d(5), d(2), "agent1", "a", "b"))]);

        assert!(agent.notify_new_knowledge(&["c d".into()], d(1)).is_none());
        assert_eq!(
            agent.notify_new_knowledge(&["b a".into()], d(1)),
            Some(Signal::ReplanRequired {
                agent: "agent1".into(),
                time: d(1),
            })
        );
    }

    #[test]
    fn test_stalled_agent_offers_nothing_until_halted() {
        let mut agent = AgentExecutor::new("agent1");
        agent.set_plan(vec![Action::Move(Move::new(d(5), d(2), "agent1", "a", "b"))]);

        agent.stall();
        assert!(agent.next_action().is_none());
        assert!(agent.is_idle());

        agent.halt(d(6));
        assert!(!agent.is_stalled());
    }

    #[test]
    fn test_bids_price_extra_time_after_won_work() {
        let context = context();
        let mut model = model();
        model.insert_object(
            "room",
            "rm3",
            WorldObject::new().with_fact("dirty", true).with_fact("dirtiness", d(1)),
        );
        model.graph = model.graph.clone().with_edge("rm2", "rm3", d(1));
        let mut executor = AgentExecutor::new("agent1");
        let mut bidder = AgentBidder {
            executor: &mut executor,
            model: &model,
            context: &context,
            time: d(10),
            events: &[],
        };

        let first = bidder.generate_bid(&Task::new(cleaned("rm2"), d(1))).unwrap().unwrap();
        assert_eq!(first.estimated_endtime, d(16));
        assert_eq!(first.additional_cost, d(6));
        bidder.notify_bid_won(&first);

        let second = bidder.generate_bid(&Task::new(cleaned("rm3"), d(1))).unwrap().unwrap();
        // rm3 is on the way, so the tour does it first and rm2 finishes at 19
        assert_eq!(second.estimated_endtime, d(19));
        assert_eq!(second.additional_cost, d(3));
        assert_eq!(executor.won_bids().len(), 1);
    }
}
