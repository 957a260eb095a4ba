//! Discrete-event loop driving every executor over one model
//!
//! Each iteration asks every executor for the state it wants processed next,
//! pops the earliest batch of equal (time, execution state) and starts or
//! finishes it. Finishing an action applies it to the model; surprises become
//! signals that halt and replan through the coordinator.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::report::SimulationReport;
use crate::actions::{Action, Effect, Owner};
use crate::core::accuracy::as_start_time;
use crate::core::config::{ReplanPolicy, SimulationConfig, StallPolicy};
use crate::core::error::{Result, SimError};
use crate::core::types::Deadline;
use crate::domain::DomainContext;
use crate::execution::{
    ActionState, ActionStateQueue, AdjustToPartialRequest, ExecutionState, RemoveActionsWithStateRequest,
    Request,
};
use crate::executor::{route_all, Context, Coordinator, EventExecutor, Executors, Signal};
use crate::model::{GoalAchievement, Model};
use crate::planner::Planner;

/// An agent parked because its next action could not run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StallRecord {
    pub agent: String,
    pub time: Decimal,
}

#[derive(Clone)]
pub struct Simulator {
    model: Model,
    context: Context,
    executors: Executors,
    time: Decimal,
    /// Finished actions in finish order, observations left out
    executed: Vec<Action>,
    stalls: Vec<StallRecord>,
    stall_policy: StallPolicy,
    /// Set once the initial observation has been made
    started: bool,
}

impl Simulator {
    pub fn new(
        model: Model,
        domain: Arc<dyn DomainContext>,
        planner: Arc<dyn Planner>,
        config: SimulationConfig,
    ) -> Result<Self> {
        config.validate().map_err(SimError::Config)?;
        if model.domain != domain.name() {
            return Err(SimError::InvalidModel(format!(
                "problem is for domain {} but {} was selected",
                model.domain,
                domain.name()
            )));
        }
        let agents = domain.agents(&model);
        if agents.is_empty() {
            return Err(SimError::InvalidModel("problem has no agents".into()));
        }
        let events = EventExecutor::new(model.events.clone());
        let coordinator = Some(Coordinator::for_config(&config));
        let stall_policy = config.stall_policy;
        info!(
            domain = domain.name(),
            agents = agents.len(),
            goals = model.goals.len(),
            coordinator = ?config.coordinator,
            "simulator ready"
        );
        Ok(Self {
            model,
            context: Context::new(domain, planner, config),
            executors: Executors::new(agents, events, coordinator),
            time: Decimal::ZERO,
            executed: Vec::new(),
            stalls: Vec::new(),
            stall_policy,
            started: false,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn time(&self) -> Decimal {
        self.time
    }

    pub fn executed(&self) -> &[Action] {
        &self.executed
    }

    pub fn stalls(&self) -> &[StallRecord] {
        &self.stalls
    }

    pub fn executors(&self) -> &Executors {
        &self.executors
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport::new(
            self.model.goal_achievement(),
            as_start_time(self.time),
            &self.executed,
            &self.stalls,
        )
    }

    /// Run until nothing has goals or `deadline` passes
    ///
    /// Returns `None` without doing anything when the clock is already past
    /// the deadline or no executor has work. Actions still running at a
    /// finite deadline are cut short there and their progress committed.
    pub fn run(&mut self, deadline: Deadline) -> Result<Option<GoalAchievement>> {
        if !self.started {
            self.observe_initial();
            self.started = true;
        }
        let end = deadline.as_end_time();
        if end.has_elapsed(self.time) || !self.has_goals(end) {
            return Ok(None);
        }

        while self.has_goals(end) {
            let mut queue = self.executors.next_actions(&self.model, &self.context, self.time);
            let Some(first) = queue.peek() else {
                break;
            };
            if !end.admits(first.time) {
                break;
            }
            self.process_batch(&mut queue)?;
        }

        if let Deadline::At(end) = end {
            self.truncate_at(end)?;
        }
        let achievement = self.model.goal_achievement();
        info!(time = %self.time, goals = %achievement, "run finished");
        Ok(Some(achievement))
    }

    /// The hypothesis model as it will be at `deadline` if nobody replans
    ///
    /// Agents only finish what they are already doing and only visible
    /// scheduled events happen.
    pub fn predict_model(&self, deadline: Decimal) -> Result<Model> {
        let agents = self
            .executors
            .agents
            .iter()
            .map(|(name, agent)| (name.clone(), agent.executing_only()))
            .collect();
        let mut nested = Simulator {
            model: self.model.hypothesis(),
            context: self.context.clone(),
            executors: Executors {
                agents,
                events: EventExecutor::new(self.executors.events.pending_events()),
                coordinator: None,
            },
            time: self.time,
            executed: Vec::new(),
            stalls: Vec::new(),
            stall_policy: StallPolicy::Defer,
            started: true,
        };
        nested.run(Deadline::At(deadline))?;
        debug!(%deadline, "predicted model");
        Ok(nested.model)
    }

    fn has_goals(&self, deadline: Deadline) -> bool {
        self.executors
            .has_goals(&self.model, &self.context, self.time, deadline)
    }

    /// Agents see their surroundings before anything is planned
    fn observe_initial(&mut self) {
        let nodes: Vec<String> = self
            .executors
            .agents
            .keys()
            .filter_map(|agent| self.model.location_of(agent).map(String::from))
            .collect();
        for node in nodes {
            let changed = self.model.observe(&node);
            if !changed.is_empty() {
                debug!(%node, ?changed, "initial observation");
            }
        }
    }

    fn process_batch(&mut self, queue: &mut ActionStateQueue) -> Result<()> {
        let batch = queue.pop_batch();
        let Some(state) = batch.first().map(|s| s.state) else {
            return Ok(());
        };
        match state {
            ExecutionState::PreStart => self.start_batch(batch),
            ExecutionState::Executing => self.finish_batch(batch),
            ExecutionState::Finished => Ok(()),
        }
    }

    fn start_batch(&mut self, batch: Vec<ActionState>) -> Result<()> {
        // Planning sees the world after everything else starting now has started
        let (planning, regular): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(|s| s.action.is_planning());
        for state in regular.into_iter().chain(planning) {
            if !self.is_current(&state) {
                debug!(action = %state.action, "skipping stale start");
                continue;
            }
            if state.time < self.time {
                return Err(SimError::StartTimeInPast {
                    start: state.time,
                    now: self.time,
                    action: state.action.to_string(),
                });
            }
            self.time = state.time;

            if !state.action.is_planning() && !state.action.is_applicable(&self.model) {
                self.stall(&state, true)?;
                continue;
            }
            self.start(&state)?;
        }
        Ok(())
    }

    fn start(&mut self, state: &ActionState) -> Result<()> {
        match state.action.owner() {
            Owner::Agent(name) => {
                let events = self.executors.events.known_events(state.time);
                match self.executors.agents.get_mut(&name) {
                    Some(agent) => agent.notify_action_starting(state, &self.model, &self.context, &events),
                    None => Err(SimError::UnknownObject(name)),
                }
            }
            Owner::Events => self.executors.events.notify_action_starting(state),
            Owner::Coordinator => match &state.action {
                Action::Allocate(_) => self
                    .executors
                    .start_allocation(state, &self.model, &self.context),
                _ => self.start_central_plan(state),
            },
        }
    }

    /// Settle in-flight actions, predict the world at the window's end and plan on it
    fn start_central_plan(&mut self, state: &ActionState) -> Result<()> {
        let Some(Coordinator::CentralPlanner(planner)) = &self.executors.coordinator else {
            return Err(SimError::InvalidModel(format!(
                "no central planner to start {}",
                state.action
            )));
        };
        let origin = as_start_time(state.action.end_time());
        let request: Box<dyn Request> = match planner.replan_policy() {
            ReplanPolicy::Partial => Box::new(AdjustToPartialRequest::new(state.time)),
            ReplanPolicy::Finish => Box::new(RemoveActionsWithStateRequest::new(
                origin,
                &[ExecutionState::PreStart, ExecutionState::Executing],
            )),
        };
        let changes = self.executors.adjust_agents(request.as_ref())?;
        if !changes.is_empty() {
            debug!(changes = changes.len(), "in-flight actions adjusted for replanning");
        }

        let predicted = self.predict_model(origin)?;
        let events = self.executors.events.known_events(origin);
        match self.executors.coordinator.as_mut() {
            Some(Coordinator::CentralPlanner(planner)) => {
                planner.notify_action_starting(state, &self.model, &predicted, &self.context, &events)
            }
            _ => Ok(()),
        }
    }

    fn finish_batch(&mut self, batch: Vec<ActionState>) -> Result<()> {
        for state in batch {
            if !self.is_current(&state) {
                debug!(action = %state.action, "skipping stale finish");
                continue;
            }
            self.time = self.time.max(state.time);

            if !state.action.is_applicable(&self.model) {
                self.stall(&state, false)?;
                continue;
            }
            let finished = state.finish()?;
            let effect = finished.action.apply(&mut self.model)?;
            self.record(&finished.action, &effect);

            let mut signals = match finished.action.owner() {
                Owner::Agent(name) => match self.executors.agents.get_mut(&name) {
                    Some(agent) => agent.notify_action_finishing(&finished, &effect, &self.context),
                    None => Vec::new(),
                },
                Owner::Events => {
                    self.executors.events.notify_action_finishing();
                    Vec::new()
                }
                Owner::Coordinator => {
                    self.executors.finish_coordinator(&finished, &self.context);
                    Vec::new()
                }
            };
            let changed = effect.changed_ids();
            if !changed.is_empty() {
                info!(time = %self.time, ids = ?changed, "new knowledge");
                signals.push(Signal::NewKnowledge {
                    time: as_start_time(self.time),
                    ids: changed.to_vec(),
                });
            }
            route_all(&mut self.executors, signals);
        }
        Ok(())
    }

    fn record(&mut self, action: &Action, effect: &Effect) {
        match effect {
            Effect::Partial(record) => self.executed.push(record.as_ref().clone()),
            _ if matches!(action, Action::Observe(_)) => {}
            _ => self.executed.push(action.clone()),
        }
    }

    /// Apply the stall policy to an action that cannot start or finish
    fn stall(&mut self, state: &ActionState, starting: bool) -> Result<()> {
        let agent = match state.action.owner() {
            Owner::Agent(agent) if self.stall_policy == StallPolicy::Defer => agent,
            Owner::Agent(agent) if starting => {
                return Err(SimError::Stalled {
                    agent,
                    time: state.time,
                    action: state.action.to_string(),
                })
            }
            _ => {
                return Err(SimError::NotApplicable {
                    time: state.time,
                    action: state.action.to_string(),
                })
            }
        };
        warn!(%agent, time = %state.time, action = %state.action, "agent stalled");
        if let Some(executor) = self.executors.agents.get_mut(&agent) {
            executor.stall();
        }
        self.stalls.push(StallRecord {
            agent: agent.clone(),
            time: state.time,
        });
        route_all(
            &mut self.executors,
            vec![Signal::Stalled {
                agent,
                time: as_start_time(state.time),
            }],
        );
        Ok(())
    }

    fn is_current(&self, state: &ActionState) -> bool {
        self.executors
            .is_current(state, &self.model, &self.context, state.time)
    }

    /// Commit the progress of actions still running at `end` and drop them
    fn truncate_at(&mut self, end: Decimal) -> Result<()> {
        let mut queue: ActionStateQueue = self
            .executors
            .agents
            .values()
            .filter_map(|agent| agent.executing().cloned())
            .collect();
        let changes = AdjustToPartialRequest::new(end).adjust(&mut queue)?;
        for change in changes {
            if let Some(partial) = &change.action {
                let effect = partial.apply(&mut self.model)?;
                self.record(partial, &effect);
            }
            for agent in &change.agents {
                if let Some(executor) = self.executors.agents.get_mut(agent) {
                    executor.take_in_flight();
                }
            }
        }
        self.time = self.time.max(end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CoordinatorKind;
    use crate::domain;
    use crate::model::{Event, EventKind, Fact, Graph, UnknownFact, WorldObject};
    use crate::planner::HeuristicPlanner;

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn dirty(dirtiness: i64) -> WorldObject {
        WorldObject::new()
            .with_fact("dirty", true)
            .with_fact("dirtiness", d(dirtiness))
    }

    /// rm1 -1- rm2 -1- rm3, one agent at rm1
    fn corridor() -> Model {
        let mut model = Model::new("janitor")
            .with_object("agent", "agent1", WorldObject::new().with_fact("at", Fact::located("rm1")))
            .with_object("room", "rm1", WorldObject::new())
            .with_object("room", "rm2", WorldObject::new())
            .with_object("room", "rm3", dirty(2))
            .with_goal(&["cleaned", "rm3"]);
        model.graph = Graph::new()
            .with_edge("rm1", "rm2", d(1))
            .with_edge("rm2", "rm3", d(1));
        model.graph.bidirectional = true;
        model
    }

    fn simulator(model: Model, coordinator: CoordinatorKind) -> Simulator {
        let domain = domain::for_name("janitor").unwrap();
        let planner = Arc::new(HeuristicPlanner::new(domain.clone(), Decimal::ONE));
        let config = SimulationConfig {
            coordinator,
            ..SimulationConfig::default()
        };
        Simulator::new(model, domain, planner, config).unwrap()
    }

    fn names(actions: &[Action]) -> Vec<&'static str> {
        actions.iter().map(Action::type_name).collect()
    }

    #[test]
    fn test_market_run_cleans_the_room() {
        let mut sim = simulator(corridor(), CoordinatorKind::Market);
        let achievement = sim.run(Deadline::Never).unwrap().unwrap();

        assert!(achievement.is_complete());
        assert_eq!(names(sim.executed()), vec!["Allocate", "LocalPlan", "Move", "Move", "Clean"]);
        // Allocate 1, LocalPlan budget 10, two moves, clean 2
        assert_eq!(sim.report().end_simulation_time, d(15));
    }

    #[test]
    fn test_central_run_cleans_the_room() {
        let mut sim = simulator(corridor(), CoordinatorKind::Central);
        let achievement = sim.run(Deadline::Never).unwrap().unwrap();

        assert!(achievement.is_complete());
        assert_eq!(names(sim.executed()), vec!["Plan", "Move", "Move", "Clean"]);
        assert_eq!(sim.report().end_simulation_time, d(14));
    }

    #[test]
    fn test_nothing_to_do_returns_none() {
        let mut model = corridor();
        model.goals.clear();
        let mut sim = simulator(model, CoordinatorKind::Market);
        assert_eq!(sim.run(Deadline::Never).unwrap(), None);
        assert!(sim.executed().is_empty());
    }

    #[test]
    fn test_deadline_truncates_running_actions() {
        let mut sim = simulator(corridor(), CoordinatorKind::Market);
        // Moves run 11..12 and 12..13; stop halfway through the second
        let achievement = sim.run(Deadline::At(Decimal::new(125, 1))).unwrap().unwrap();

        assert!(!achievement.is_complete());
        let last = sim.executed().last().unwrap();
        assert!(last.is_partial());
        assert_eq!(last.end_time(), Decimal::new(124995, 4));
        assert!(sim.executors().agents_idle());
        assert_eq!(sim.run(Deadline::At(d(12))).unwrap(), None);
    }

    #[test]
    fn test_surprise_triggers_reallocation() {
        let mut model = corridor();
        let room = model.object_mut("rm2").unwrap();
        *room = WorldObject::new()
            .with_fact("dirtiness", d(1))
            .with_unknown("dirty", UnknownFact::new(true));
        model.assumed_values.insert("dirty".into(), Fact::Bool(false));
        model.goals.push(vec!["cleaned".into(), "rm2".into()]);

        let mut sim = simulator(model, CoordinatorKind::Market);
        let achievement = sim.run(Deadline::Never).unwrap().unwrap();

        assert!(achievement.is_complete());
        let allocations = sim
            .executed()
            .iter()
            .filter(|a| matches!(a, Action::Allocate(_)))
            .count();
        assert!(allocations >= 2);
    }

    #[test]
    fn test_prediction_sees_only_visible_events() {
        let mut model = corridor();
        model.events = vec![
            Event::new(d(3), EventKind::Object, "rm1").with_predicate("dirty", true),
            Event::new(d(3), EventKind::Object, "rm2")
                .with_predicate("dirty", true)
                .hidden(),
        ];
        let sim = simulator(model, CoordinatorKind::Market);
        let predicted = sim.predict_model(d(5)).unwrap();

        assert!(predicted.find_object("rm1").unwrap().is("dirty"));
        assert!(!predicted.find_object("rm2").unwrap().is("dirty"));
        // the real model is untouched
        assert!(!sim.model().find_object("rm1").unwrap().is("dirty"));
    }

    #[test]
    fn test_stall_is_fatal_by_default() {
        let mut sim = simulator(corridor(), CoordinatorKind::Market);
        sim.executors.coordinator = None;
        sim.executors
            .agents
            .get_mut("agent1")
            .unwrap()
            .set_plan(vec![Action::Move(crate::actions::Move::new(
                d(0),
                d(1),
                "agent1",
                "rm2",
                "rm3",
            ))]);
        let err = sim.run(Deadline::Never).unwrap_err();
        assert!(matches!(err, SimError::Stalled { .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_deferred_stall_is_recorded() {
        let mut sim = simulator(corridor(), CoordinatorKind::Market);
        sim.stall_policy = StallPolicy::Defer;
        sim.executors.coordinator = None;
        sim.executors
            .agents
            .get_mut("agent1")
            .unwrap()
            .set_plan(vec![Action::Move(crate::actions::Move::new(
                d(0),
                d(1),
                "agent1",
                "rm2",
                "rm3",
            ))]);

        assert_eq!(sim.run(Deadline::Never).unwrap(), Some(GoalAchievement { achieved: 0, total: 1 }));
        assert_eq!(
            sim.stalls(),
            &[StallRecord {
                agent: "agent1".into(),
                time: d(0)
            }]
        );
        assert!(sim.executors().agents["agent1"].is_stalled());
    }

    #[test]
    fn test_wrong_domain_is_rejected() {
        let domain = domain::for_name("roborescue").unwrap();
        let planner = Arc::new(HeuristicPlanner::new(domain.clone(), Decimal::ONE));
        let result = Simulator::new(corridor(), domain, planner, SimulationConfig::default());
        assert!(matches!(result, Err(SimError::InvalidModel(_))));
    }
}
