//! Search-and-rescue actions: clearing roads and recovering civilians

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::{agent_at, Action, Effect, Operation, Timing};
use crate::core::error::{Result, SimError};
use crate::model::{edge_id, Fact, Model};

/// Police clearing a blocked road between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Unblock {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub start_node: String,
    pub end_node: String,
}

impl Unblock {
    pub fn new(
        start_time: Decimal,
        duration: Decimal,
        agent: &str,
        start_node: &str,
        end_node: &str,
    ) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            start_node: start_node.to_string(),
            end_node: end_node.to_string(),
        }
    }

    fn edge_ids(&self) -> [String; 2] {
        [
            edge_id(&self.start_node, &self.end_node),
            edge_id(&self.end_node, &self.start_node),
        ]
    }

    fn clear(&self, model: &mut Model) {
        for id in self.edge_ids() {
            if let Some(edge) = model.graph.edges.get_mut(&id) {
                edge.set("edge", true);
                edge.set("blocked-edge", false);
                edge.remove("blockedness");
            }
        }
    }
}

impl Operation for Unblock {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.start_node, &self.end_node]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        (agent_at(model, &self.agent, &self.start_node)
            || agent_at(model, &self.agent, &self.end_node))
            && model.graph.edge(&self.start_node, &self.end_node).is_some()
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        if model.graph.is_traversable(&self.start_node, &self.end_node) {
            info!(agent = %self.agent, edge = %edge_id(&self.start_node, &self.end_node),
                "edge was already unblocked");
            return Ok(Effect::Unchanged);
        }
        self.clear(model);
        Ok(Effect::Unchanged)
    }

    fn partially_apply(&self, model: &mut Model, deadline: Decimal) -> Result<Option<Action>> {
        let work = deadline - self.timing.start_time();
        let [forward, _] = self.edge_ids();
        let remaining = model
            .graph
            .edges
            .get(&forward)
            .ok_or_else(|| SimError::UnknownEdge(forward.clone()))?
            .number("blockedness")
            .unwrap_or_default()
            - work;

        if remaining <= Decimal::ZERO {
            info!(action = %Action::Unblock(self.clone()), "could have completed in less time than allotted");
            self.clear(model);
        } else {
            for id in self.edge_ids() {
                if let Some(edge) = model.graph.edges.get_mut(&id) {
                    edge.set("blockedness", remaining);
                }
            }
        }
        Ok(None)
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        self.edge_ids().iter().any(|e| e == id)
    }
}

/// Medic digging out a buried civilian
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Rescue {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub target: String,
    pub node: String,
}

impl Rescue {
    pub fn new(start_time: Decimal, duration: Decimal, agent: &str, target: &str, node: &str) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            target: target.to_string(),
            node: node.to_string(),
        }
    }

    fn unbury(&self, model: &mut Model) -> Result<()> {
        let target = model.object_mut(&self.target)?;
        target.set("buried", false);
        target.set("unburied", true);
        target.remove("buriedness");
        Ok(())
    }
}

impl Operation for Rescue {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.target, &self.node]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        agent_at(model, &self.agent, &self.node)
            && model
                .find_object(&self.target)
                .map(|t| t.is("buried") && t.location() == Some(self.node.as_str()))
                .unwrap_or(false)
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        self.unbury(model)?;
        Ok(Effect::Unchanged)
    }

    fn partially_apply(&self, model: &mut Model, deadline: Decimal) -> Result<Option<Action>> {
        let work = deadline - self.timing.start_time();
        let remaining = model
            .object(&self.target)?
            .number("buriedness")
            .unwrap_or_default()
            - work;
        if remaining <= Decimal::ZERO {
            info!(action = %Action::Rescue(self.clone()), "could have completed in less time than allotted");
            self.unbury(model)?;
        } else {
            model.object_mut(&self.target)?.set("buriedness", remaining);
        }
        Ok(None)
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        id == self.node || id == self.target
    }
}

/// Medic picking up an unburied civilian
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Load {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub target: String,
    pub node: String,
}

impl Load {
    pub fn new(start_time: Decimal, duration: Decimal, agent: &str, target: &str, node: &str) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            target: target.to_string(),
            node: node.to_string(),
        }
    }
}

impl Operation for Load {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.target, &self.node]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        let Some(agent) = model.find_object(&self.agent) else {
            return false;
        };
        if agent.location() != Some(self.node.as_str()) || !agent.is("empty") {
            return false;
        }
        model
            .find_object(&self.target)
            .map(|t| !t.is("buried") && t.location() == Some(self.node.as_str()))
            .unwrap_or(false)
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        let agent = model.object_mut(&self.agent)?;
        agent.set("empty", false);
        agent.set("carrying", Fact::located(&self.target));
        model
            .object_mut(&self.target)?
            .set("at", Fact::located(&self.agent));
        Ok(Effect::Unchanged)
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        id == self.node || id == self.target
    }
}

/// Medic dropping a carried civilian at a hospital
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Unload {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub target: String,
    pub node: String,
}

impl Unload {
    pub fn new(start_time: Decimal, duration: Decimal, agent: &str, target: &str, node: &str) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            target: target.to_string(),
            node: node.to_string(),
        }
    }
}

impl Operation for Unload {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.target, &self.node]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        model
            .find_object(&self.agent)
            .map(|agent| {
                agent.location() == Some(self.node.as_str())
                    && agent.get("carrying").and_then(Fact::located_at) == Some(self.target.as_str())
            })
            .unwrap_or(false)
    }

    /// A civilian who died on the way is delivered but not rescued
    fn apply(&self, model: &mut Model) -> Result<Effect> {
        let agent = model.object_mut(&self.agent)?;
        agent.set("empty", true);
        agent.remove("carrying");

        let target = model.object_mut(&self.target)?;
        let alive = target.get("alive").map(|f| *f != Fact::Bool(false)).unwrap_or(true);
        target.set("at", Fact::located(&self.node));
        target.set("rescued", alive);
        Ok(Effect::Unchanged)
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        id == self.node || id == self.target
    }
}
