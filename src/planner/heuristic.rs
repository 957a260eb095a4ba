//! In-process planner
//!
//! Delegates to the domain's greedy planner and charges a fixed simulated
//! planning time, so runs are reproducible regardless of host speed.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use super::{PlanOutcome, PlanRequest, Planner};
use crate::core::error::Result;
use crate::domain::DomainContext;

#[derive(Debug, Clone)]
pub struct HeuristicPlanner {
    domain: Arc<dyn DomainContext>,
    planning_time: Decimal,
}

impl HeuristicPlanner {
    pub fn new(domain: Arc<dyn DomainContext>, planning_time: Decimal) -> Self {
        Self {
            domain,
            planning_time,
        }
    }
}

impl Planner for HeuristicPlanner {
    fn get_plan(&self, request: &PlanRequest) -> Result<PlanOutcome> {
        let plan = self.domain.heuristic_plan(request)?;
        debug!(
            agent = ?request.agent,
            goals = request.goals.len(),
            actions = plan.as_ref().map(Vec::len),
            "heuristic plan"
        );
        Ok(PlanOutcome {
            plan,
            time_taken: self.planning_time,
        })
    }
}
