//! Movement along graph edges
//!
//! An interrupted move leaves its agent on a temp node part-way along the
//! edge. The temp node gets an edge forward (distance remaining) and an edge
//! back (distance moved); resuming from it shifts distance between those two
//! edges instead of creating another node.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use super::{agent_at, Action, Effect, Operation, Timing};
use crate::core::error::{Result, SimError};
use crate::model::{edge_id, is_temp_node, split_edge_id, temp_node_id, Model, WorldObject};

/// Kind used for temp nodes when the start node is not itself an object
const DEFAULT_NODE_KIND: &str = "node";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Move {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub start_node: String,
    pub end_node: String,
}

impl Move {
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

    pub fn edge(&self) -> String {
        edge_id(&self.start_node, &self.end_node)
    }

    fn distance_moved(&self, deadline: Decimal) -> Decimal {
        deadline - self.timing.start_time()
    }

    fn partial_record(&self, moved: Decimal, end_node: &str) -> Action {
        Action::Move(Move {
            timing: Timing::new(self.timing.start_time(), moved).as_partial(moved),
            agent: self.agent.clone(),
            start_node: self.start_node.clone(),
            end_node: end_node.to_string(),
        })
    }

    /// Split the edge at the agent's position and park the agent on a new temp node
    fn create_temp_node(&self, model: &mut Model, deadline: Decimal) -> Result<Action> {
        let temp = temp_node_id(&self.agent, &self.start_node, &self.end_node);
        if model.contains_object(&temp) || !model.graph.edges_touching(&temp).is_empty() {
            return Err(SimError::TempNodeCollision(temp));
        }

        let edge = model
            .graph
            .edge(&self.start_node, &self.end_node)
            .ok_or_else(|| SimError::UnknownEdge(self.edge()))?;
        let distance = edge
            .number("distance")
            .ok_or_else(|| SimError::InvalidModel(format!("edge {} has no distance", self.edge())))?;
        let blocked = !edge.is("edge");

        let moved = self.distance_moved(deadline);
        let remaining = distance - moved;
        let past_halfway = remaining < moved;

        let kind = model
            .object_kind(&self.start_node)
            .unwrap_or(DEFAULT_NODE_KIND)
            .to_string();
        model.insert_object(&kind, &temp, WorldObject::new());

        // A blocked edge only lets the agent leave the way it is facing
        model.graph.edges.insert(
            edge_id(&temp, &self.end_node),
            WorldObject::new()
                .with_fact("edge", !blocked || past_halfway)
                .with_fact("distance", remaining),
        );
        model.graph.edges.insert(
            edge_id(&temp, &self.start_node),
            WorldObject::new()
                .with_fact("edge", !blocked || !past_halfway)
                .with_fact("distance", moved),
        );

        model.set_location(&self.agent, &temp)?;
        debug!(agent = %self.agent, node = %temp, %moved, %remaining, "created temp node");
        Ok(self.partial_record(moved, &temp))
    }

    /// Shift progress between the two edges of the temp node the move started from
    fn modify_temp_node(&self, model: &mut Model, deadline: Decimal) -> Result<Action> {
        let temp = &self.start_node;
        let along = self.edge();
        let other = model
            .graph
            .edges
            .keys()
            .find(|id| {
                *id != &along
                    && split_edge_id(id)
                        .map(|(start, _)| start == temp)
                        .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| SimError::UnknownEdge(format!("{} <other>", temp)))?;

        let moved = self.distance_moved(deadline);
        let forward = adjust_distance(model, &along, -moved)?;
        let back = adjust_distance(model, &other, moved)?;

        if forward <= Decimal::ZERO || back <= Decimal::ZERO {
            return Err(SimError::InvalidModel(format!(
                "temp node {} edges must stay positive: {} {}, {} {}",
                temp, along, forward, other, back
            )));
        }

        debug!(agent = %self.agent, node = %temp, %moved, "resumed move from temp node");
        Ok(self.partial_record(moved, &self.end_node))
    }

    fn distance(&self, model: &Model) -> Option<Decimal> {
        model.graph.distance(&self.start_node, &self.end_node)
    }
}

fn adjust_distance(model: &mut Model, id: &str, delta: Decimal) -> Result<Decimal> {
    let edge = model
        .graph
        .edges
        .get_mut(id)
        .ok_or_else(|| SimError::UnknownEdge(id.to_string()))?;
    let distance = edge.number("distance").unwrap_or_default() + delta;
    edge.set("distance", distance);
    Ok(distance)
}

impl Operation for Move {
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
        agent_at(model, &self.agent, &self.start_node)
            && (self.timing.partial()
                || model
                    .graph
                    .is_traversable(&self.start_node, &self.end_node))
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        model.set_location(&self.agent, &self.end_node)?;
        if is_temp_node(&self.start_node) {
            model.remove_object(&self.start_node);
            model.graph.remove_edges_touching(&self.start_node);
        }
        Ok(Effect::Unchanged)
    }

    fn partially_apply(&self, model: &mut Model, deadline: Decimal) -> Result<Option<Action>> {
        let moved = self.distance_moved(deadline);
        if moved <= Decimal::ZERO {
            return Ok(None);
        }
        if let Some(distance) = self.distance(model) {
            if moved >= distance {
                info!(action = %Action::Move(self.clone()), "move reached its end before the deadline");
                return self.apply(model).map(|_| None);
            }
        }
        let record = if is_temp_node(&self.start_node) {
            self.modify_temp_node(model, deadline)?
        } else {
            self.create_temp_node(model, deadline)?
        };
        Ok(Some(record))
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        id == self.edge() || id == edge_id(&self.end_node, &self.start_node)
    }
}
