//! Executors decide what happens next
//!
//! Every executor lives in the `Executors` arena owned by the simulator.
//! Executors never hold references to each other: when one needs to affect
//! another it returns a `Signal`, and the arena routes it.

pub mod agent;
pub mod allocator;
pub mod central;
pub mod events;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::actions::Owner;
use crate::core::config::{CoordinatorKind, SimulationConfig};
use crate::core::error::{Result, SimError};
use crate::core::types::Deadline;
use crate::domain::DomainContext;
use crate::execution::{ActionState, ActionStateQueue, ChangedAction, ExecutionState, Request};
use crate::model::{Event, Model};
use crate::planner::Planner;

pub use agent::{AgentBidder, AgentExecutor};
pub use allocator::TaskAllocatorExecutor;
pub use central::CentralPlannerExecutor;
pub use events::EventExecutor;

/// Collaborators shared by every executor of a run, nested runs included
#[derive(Clone)]
pub struct Context {
    pub domain: Arc<dyn DomainContext>,
    pub planner: Arc<dyn Planner>,
    pub config: SimulationConfig,
}

impl Context {
    pub fn new(
        domain: Arc<dyn DomainContext>,
        planner: Arc<dyn Planner>,
        config: SimulationConfig,
    ) -> Self {
        Self {
            domain,
            planner,
            config,
        }
    }
}

/// Cross-executor effects
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Facts were revealed or changed by an action or event
    NewKnowledge { time: Decimal, ids: Vec<String> },
    /// An agent's local planner found no plan
    PlanningFailure { agent: String, time: Decimal },
    /// An agent's remaining plan depends on changed facts
    ReplanRequired { agent: String, time: Decimal },
    /// An agent could not start or finish an action
    Stalled { agent: String, time: Decimal },
    /// Planning-only events implied by an agent's new plan
    GoalRealisation { agent: String, events: Vec<Event> },
}

/// The executor keeping the agents' plans consistent with each other
#[derive(Debug, Clone)]
pub enum Coordinator {
    TaskAllocator(TaskAllocatorExecutor),
    CentralPlanner(CentralPlannerExecutor),
}

impl Coordinator {
    pub fn for_config(config: &SimulationConfig) -> Self {
        match config.coordinator {
            CoordinatorKind::Market => Coordinator::TaskAllocator(TaskAllocatorExecutor::new()),
            CoordinatorKind::Central => {
                Coordinator::CentralPlanner(CentralPlannerExecutor::new(config.replan_policy))
            }
        }
    }

    fn has_goals(&self, model: &Model, context: &Context, agents_idle: bool, time: Decimal) -> bool {
        match self {
            Coordinator::TaskAllocator(c) => c.has_goals(model, context, agents_idle, time),
            Coordinator::CentralPlanner(c) => c.has_goals(model, context, agents_idle, time),
        }
    }

    fn next_action(&self, context: &Context, time: Decimal) -> ActionState {
        match self {
            Coordinator::TaskAllocator(c) => c.next_action(time),
            Coordinator::CentralPlanner(c) => c.next_action(context, time),
        }
    }

    fn executing(&self) -> Option<&ActionState> {
        match self {
            Coordinator::TaskAllocator(c) => c.executing(),
            Coordinator::CentralPlanner(c) => c.executing(),
        }
    }

    fn notify_new_knowledge(&mut self) {
        match self {
            Coordinator::TaskAllocator(c) => c.notify_new_knowledge(),
            Coordinator::CentralPlanner(c) => c.notify_new_knowledge(),
        }
    }

    /// Drop the current plan so the next opportunity replans
    fn invalidate(&mut self, planning_failed: bool) {
        match self {
            Coordinator::TaskAllocator(c) => c.invalidate(),
            Coordinator::CentralPlanner(c) => c.invalidate(planning_failed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Executors {
    pub agents: BTreeMap<String, AgentExecutor>,
    pub events: EventExecutor,
    pub coordinator: Option<Coordinator>,
}

impl Executors {
    pub fn new(
        agents: impl IntoIterator<Item = String>,
        events: EventExecutor,
        coordinator: Option<Coordinator>,
    ) -> Self {
        Self {
            agents: agents
                .into_iter()
                .map(|name| (name.clone(), AgentExecutor::new(&name)))
                .collect(),
            events,
            coordinator,
        }
    }

    pub fn agents_idle(&self) -> bool {
        self.agents.values().all(AgentExecutor::is_idle)
    }

    /// Whether anything is left to do
    ///
    /// Scheduled events only keep a run bounded by `deadline` going.
    pub fn has_goals(&self, model: &Model, context: &Context, time: Decimal, deadline: Deadline) -> bool {
        let agents_idle = self.agents_idle();
        !agents_idle
            || self.events.has_goals(deadline)
            || self
                .coordinator
                .as_ref()
                .is_some_and(|c| c.has_goals(model, context, agents_idle, time))
    }

    /// The next state every executor wants processed
    pub fn next_actions(&self, model: &Model, context: &Context, time: Decimal) -> ActionStateQueue {
        let mut queue: ActionStateQueue =
            self.agents.values().filter_map(AgentExecutor::next_action).collect();
        queue.extend(self.events.next_action());
        if let Some(state) = self.coordinator_action(model, context, time) {
            queue.push(state);
        }
        queue
    }

    fn coordinator_action(&self, model: &Model, context: &Context, time: Decimal) -> Option<ActionState> {
        let coordinator = self.coordinator.as_ref()?;
        if let Some(executing) = coordinator.executing() {
            return Some(executing.clone());
        }
        coordinator
            .has_goals(model, context, self.agents_idle(), time)
            .then(|| coordinator.next_action(context, time))
    }

    /// Whether `state` is still what its owner wants processed
    ///
    /// Earlier states of a batch may halt an agent or replace its plan.
    pub fn is_current(&self, state: &ActionState, model: &Model, context: &Context, time: Decimal) -> bool {
        let current = match state.action.owner() {
            Owner::Agent(name) => self.agents.get(&name).and_then(AgentExecutor::next_action),
            Owner::Events => self.events.next_action(),
            Owner::Coordinator => self.coordinator_action(model, context, time),
        };
        current.as_ref() == Some(state)
    }

    pub fn halt_agents(&mut self, time: Decimal) {
        for agent in self.agents.values_mut() {
            agent.halt(time);
        }
        self.events.clear_derived();
    }

    /// Apply `request` to every agent's in-flight states and write back the result
    ///
    /// Agents keep only the executing state the request leaves them; their
    /// plans are cleared.
    pub fn adjust_agents(&mut self, request: &dyn Request) -> Result<Vec<ChangedAction>> {
        let mut queue = ActionStateQueue::new();
        for agent in self.agents.values_mut() {
            queue.extend(agent.take_in_flight());
        }
        let changes = request.adjust(&mut queue)?;
        for state in queue.into_sorted_vec() {
            if state.state != ExecutionState::Executing {
                continue;
            }
            if let Owner::Agent(name) = state.action.owner() {
                if let Some(agent) = self.agents.get_mut(&name) {
                    agent.resume(state);
                }
            }
        }
        self.events.clear_derived();
        Ok(changes)
    }

    /// Halt every agent and run the auction for `state`
    pub fn start_allocation(&mut self, state: &ActionState, model: &Model, context: &Context) -> Result<()> {
        self.halt_agents(state.time);
        let events = self.events.known_events(state.time);
        match self.coordinator.as_mut() {
            Some(Coordinator::TaskAllocator(allocator)) => {
                allocator.notify_action_starting(state, &mut self.agents, model, context, &events)
            }
            _ => Err(SimError::InvalidModel(format!(
                "no task allocator to start {}",
                state.action
            ))),
        }
    }

    /// Hand out the plans or allocation carried by a finished coordinator action
    pub fn finish_coordinator(&mut self, state: &ActionState, context: &Context) {
        match self.coordinator.as_mut() {
            Some(Coordinator::TaskAllocator(allocator)) => {
                allocator.notify_action_finishing(state, &mut self.agents, context)
            }
            Some(Coordinator::CentralPlanner(planner)) => {
                planner.notify_action_finishing(state, &mut self.agents)
            }
            None => {}
        }
    }

    /// React to `signal`, returning any signals it causes in turn
    pub fn route(&mut self, signal: Signal) -> Vec<Signal> {
        debug!(?signal, "routing signal");
        match signal {
            Signal::NewKnowledge { time, ids } => {
                let central = matches!(self.coordinator, Some(Coordinator::CentralPlanner(_)));
                if let Some(coordinator) = self.coordinator.as_mut() {
                    coordinator.notify_new_knowledge();
                }
                if central {
                    info!(%time, ids = ?ids, "new knowledge invalidates the joint plan");
                    self.invalidate(time, false);
                    return Vec::new();
                }
                self.agents
                    .values()
                    .filter_map(|agent| agent.notify_new_knowledge(&ids, time))
                    .collect()
            }
            Signal::ReplanRequired { agent, time } => {
                info!(%agent, %time, "plan affected by new knowledge");
                self.invalidate(time, false);
                Vec::new()
            }
            Signal::PlanningFailure { agent, time } => {
                info!(%agent, %time, "local planning failed");
                self.invalidate(time, true);
                Vec::new()
            }
            Signal::Stalled { agent, time } => {
                info!(%agent, %time, "agent stalled");
                self.invalidate(time, false);
                Vec::new()
            }
            Signal::GoalRealisation { agent, events } => {
                self.events.publish(&agent, events);
                Vec::new()
            }
        }
    }

    /// Invalidate the coordinator's plan and halt every agent
    ///
    /// Without a coordinator nobody could replan, so agents carry on.
    fn invalidate(&mut self, time: Decimal, planning_failed: bool) {
        let Some(coordinator) = self.coordinator.as_mut() else {
            return;
        };
        coordinator.invalidate(planning_failed);
        self.halt_agents(time);
    }
}

/// Route signals until none are left
pub fn route_all(executors: &mut Executors, signals: Vec<Signal>) {
    let mut pending: VecDeque<Signal> = signals.into();
    while let Some(signal) = pending.pop_front() {
        pending.extend(executors.route(signal));
    }
}
