//! Actions that change what is known rather than where agents are

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::Serialize;

use super::{agent_at, Effect, Operation, Timing};
use crate::core::accuracy::{as_end_time, INSTANTANEOUS_ACTION_DURATION};
use crate::core::error::Result;
use crate::model::{Event, Model};

/// Look around `node`, revealing unknown facts of nearby objects and edges
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Observe {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub node: String,
}

impl Observe {
    /// Observation made at the end of an action finishing at `time`
    pub fn new(time: Decimal, agent: &str, node: &str) -> Self {
        Self {
            timing: Timing::new(as_end_time(time), INSTANTANEOUS_ACTION_DURATION),
            agent: agent.to_string(),
            node: node.to_string(),
        }
    }
}

impl Operation for Observe {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.node]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        agent_at(model, &self.agent, &self.node)
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        let changed = model.observe(&self.node);
        Ok(if changed.is_empty() {
            Effect::Unchanged
        } else {
            Effect::Changed(changed)
        })
    }
}

/// All scheduled events sharing one timestamp
///
/// Fires half a tick before that timestamp so agents starting at the
/// timestamp already see the change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventAction {
    #[serde(flatten)]
    pub timing: Timing,
    pub events: Vec<Event>,
}

impl EventAction {
    pub fn new(time: Decimal, events: Vec<Event>) -> Self {
        Self {
            timing: Timing::new(as_end_time(time), INSTANTANEOUS_ACTION_DURATION),
            events,
        }
    }
}

impl Operation for EventAction {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        Vec::new()
    }

    fn args(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.id.as_str()).collect()
    }

    fn is_applicable(&self, _model: &Model) -> bool {
        true
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        let mut changed = BTreeSet::new();
        for event in &self.events {
            changed.insert(event.apply(model)?);
        }
        Ok(Effect::Changed(changed.into_iter().collect()))
    }
}
