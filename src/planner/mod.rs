//! Planner boundary
//!
//! A planner turns a model plus goals into a temporal plan whose start times
//! are relative to the moment the plan will begin executing. Two planners
//! exist: an in-process heuristic planner and an external PDDL solver run as
//! a subprocess. Both report the time they took so the simulator can charge
//! it to the planning action.

pub mod decoding;
pub mod encoding;
pub mod heuristic;
pub mod pathfinding;
pub mod process;

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::actions::{Action, Observe};
use crate::allocation::Goal;
use crate::core::config::{PlannerKind, SimulationConfig};
use crate::core::error::Result;
use crate::domain::DomainContext;
use crate::model::{Event, Metric, Model};

pub use decoding::{decode_plan_block, decode_plan_output};
pub use encoding::encode_problem;
pub use heuristic::HeuristicPlanner;
pub use pathfinding::{find_route, Route};
pub use process::PddlPlanner;

/// Everything a planner needs for one call
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    /// Planning view of the world, unknown facts already replaced by assumptions
    pub model: &'a Model,
    /// Agent to plan for; `None` plans for every agent at once
    pub agent: Option<&'a str>,
    pub goals: &'a [Goal],
    pub metric: Option<&'a Metric>,
    /// Budget for the call in simulated seconds
    pub planning_time: Decimal,
    /// Absolute time the plan will start executing
    pub origin: Decimal,
    /// Known future events; only those at or after `origin` are relevant
    pub events: &'a [Event],
}

/// A planner's answer
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    /// `None` when no plan exists; start times relative to the request origin
    pub plan: Option<Vec<Action>>,
    pub time_taken: Decimal,
}

impl PlanOutcome {
    pub fn found(plan: Vec<Action>, time_taken: Decimal) -> Self {
        Self {
            plan: Some(plan),
            time_taken,
        }
    }

    pub fn failed(time_taken: Decimal) -> Self {
        Self {
            plan: None,
            time_taken,
        }
    }
}

pub trait Planner: Send + Sync {
    fn get_plan(&self, request: &PlanRequest) -> Result<PlanOutcome>;
}

/// Build the planner selected in the configuration
pub fn planner_for(
    config: &SimulationConfig,
    domain: Arc<dyn DomainContext>,
) -> Result<Arc<dyn Planner>> {
    Ok(match config.planner.kind {
        PlannerKind::Heuristic => Arc::new(HeuristicPlanner::new(
            domain,
            config.heuristic_planning_time,
        )),
        PlannerKind::Process => Arc::new(PddlPlanner::new(&config.planner, domain)?),
    })
}

/// Shift a relative plan to absolute time and interleave observations
///
/// Every move is followed by an observation at its end node, so agents learn
/// what is really there as soon as they arrive.
pub fn adjust_plan(plan: Vec<Action>, origin: Decimal) -> Vec<Action> {
    let mut adjusted = Vec::with_capacity(plan.len());
    for action in plan {
        let action = action.with_start_time(action.start_time() + origin);
        if let Action::Move(step) = &action {
            adjusted.push(Action::Observe(Observe::new(
                step.timing.end_time(),
                &step.agent,
                &step.end_node,
            )));
        }
        adjusted.push(action);
    }
    adjusted.sort_by(|a, b| {
        a.start_time()
            .cmp(&b.start_time())
            .then(a.ordinal().cmp(&b.ordinal()))
    });
    adjusted
}
