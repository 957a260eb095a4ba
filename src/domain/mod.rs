//! Domain knowledge
//!
//! A domain decides which objects are agents, which goals become tasks, how
//! an agent prices a task, what a planner is shown, and which planning-only
//! events an agent's plan implies for the others.

pub mod janitor;
pub mod roborescue;

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use rust_decimal::Decimal;

use crate::actions::{Action, ActionCatalog};
use crate::allocation::{Bid, Goal, Task, TaskKey};
use crate::core::accuracy::as_start_time;
use crate::core::error::{Result, SimError};
use crate::model::{Event, EventKind, Fact, Model};
use crate::planner::{PlanOutcome, PlanRequest, Planner};

pub use janitor::Janitor;
pub use roborescue::Roborescue;

/// Value of a task when the metric does not weight goals
pub const DEFAULT_TASK_VALUE: Decimal = Decimal::ONE;

/// Context an agent prices a task in
pub struct BidRequest<'a> {
    /// Hypothesis view of the world
    pub model: &'a Model,
    pub agent: &'a str,
    /// Bids the agent already won in this auction
    pub won_bids: &'a [Bid],
    pub planner: &'a dyn Planner,
    /// Allocation time; plans are priced as if starting now
    pub time: Decimal,
    pub planning_time: Decimal,
    pub events: &'a [Event],
}

impl BidRequest<'_> {
    /// Goals of the won bids plus `task`'s goal
    pub fn goals_with(&self, task: &Task) -> Vec<Goal> {
        self.won_bids
            .iter()
            .map(|b| b.task.goal.clone())
            .chain(std::iter::once(task.goal.clone()))
            .collect()
    }

    pub fn plan(&self, model: &Model, goals: &[Goal]) -> Result<PlanOutcome> {
        self.planner.get_plan(&PlanRequest {
            model,
            agent: Some(self.agent),
            goals,
            metric: None,
            planning_time: self.planning_time,
            origin: self.time,
            events: self.events,
        })
    }

    /// Absolute time a plan starting now finishes
    pub fn plan_end(&self, plan: &[Action]) -> Decimal {
        plan.iter()
            .map(|a| as_start_time(self.time + a.end_time()))
            .max()
            .unwrap_or(self.time)
    }

    /// Price a plan: extra time beyond the agent's last won commitment
    pub fn bid(
        &self,
        task: &Task,
        plan: &[Action],
        computation_time: Decimal,
        requirements: Vec<Task>,
    ) -> Bid {
        let estimated_endtime = self.plan_end(plan);
        let committed = self
            .won_bids
            .last()
            .map(|b| b.estimated_endtime)
            .unwrap_or(self.time);
        Bid {
            agent: self.agent.to_string(),
            estimated_endtime,
            additional_cost: estimated_endtime - committed,
            task: task.clone(),
            requirements,
            computation_time,
        }
    }
}

pub trait DomainContext: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Kinds whose objects are graph nodes
    fn node_kinds(&self) -> &'static [&'static str];

    fn agent_kinds(&self) -> &'static [&'static str];

    /// Actions the domain's plans may contain
    fn catalog(&self) -> &ActionCatalog;

    fn is_agent(&self, model: &Model, id: &str) -> bool {
        model
            .object_kind(id)
            .is_some_and(|kind| self.agent_kinds().contains(&kind))
    }

    /// Every agent in the model, in kind then id order
    fn agents(&self, model: &Model) -> Vec<String> {
        model.ids_of(self.agent_kinds())
    }

    /// Unmet, live goals turned into tasks
    fn compute_tasks(&self, model: &Model, time: Decimal) -> Vec<Task>;

    fn task_key(&self, task: &Task) -> TaskKey;

    /// Price `task` for `request.agent`; `None` declines it
    fn generate_bid(&self, request: &BidRequest, task: &Task) -> Result<Option<Bid>>;

    /// The part of the world an agent plans over
    fn transform_model_for_planning(&self, model: &Model, agent: &str, goals: &[Goal]) -> Model;

    /// Planning-only events implied by an agent's plan
    fn extract_events(&self, plan: &[Action], goals: &[Goal]) -> Vec<Event>;

    /// Greedy plan relative to `request.origin`; `None` when a goal is unreachable
    fn heuristic_plan(&self, request: &PlanRequest) -> Result<Option<Vec<Action>>>;
}

pub fn for_name(name: &str) -> Result<Arc<dyn DomainContext>> {
    match name {
        "janitor" => Ok(Arc::new(Janitor::new())),
        "roborescue" => Ok(Arc::new(Roborescue::new())),
        other => Err(SimError::UnknownDomain(other.to_string())),
    }
}

/// Relative times at which known events make blocked edges passable
pub(crate) fn clear_times(events: &[Event], origin: Decimal) -> AHashMap<String, Decimal> {
    let mut times: AHashMap<String, Decimal> = AHashMap::new();
    for event in events {
        if event.hidden || event.kind != EventKind::Edge || !event.sets("edge", &Fact::Bool(true)) {
            continue;
        }
        let at = (event.time - origin).max(Decimal::ZERO);
        times
            .entry(event.id.clone())
            .and_modify(|t| *t = (*t).min(at))
            .or_insert(at);
    }
    times
}
