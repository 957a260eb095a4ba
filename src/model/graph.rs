//! Directed movement graph
//!
//! Edges are keyed `"start end"`; each carries known/unknown facts such as
//! `edge` (traversable) and `distance`.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde_json::Value;

use super::facts::WorldObject;
use crate::core::error::{Result, SimError};

/// Prefix of synthetic nodes standing for a position part-way along an edge
pub const TEMP_NODE_PREFIX: &str = "temp";

pub fn edge_id(start: &str, end: &str) -> String {
    format!("{} {}", start, end)
}

pub fn split_edge_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(' ')
}

pub fn is_temp_node(node: &str) -> bool {
    node.starts_with(TEMP_NODE_PREFIX)
}

/// Deterministic id of the temp node for `agent` interrupted between two nodes
pub fn temp_node_id(agent: &str, start: &str, end: &str) -> String {
    format!("{}-{}-{}-{}", TEMP_NODE_PREFIX, agent, start, end)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub bidirectional: bool,
    pub edges: BTreeMap<String, WorldObject>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_edge(mut self, start: &str, end: &str, distance: Decimal) -> Self {
        self.edges.insert(
            edge_id(start, end),
            WorldObject::new()
                .with_fact("edge", true)
                .with_fact("distance", distance),
        );
        self
    }

    /// Edge from `start` to `end`, falling back to the reverse key on bidirectional graphs
    pub fn edge(&self, start: &str, end: &str) -> Option<&WorldObject> {
        self.edges.get(&edge_id(start, end)).or_else(|| {
            if self.bidirectional {
                self.edges.get(&edge_id(end, start))
            } else {
                None
            }
        })
    }

    pub fn edge_mut(&mut self, start: &str, end: &str) -> Option<&mut WorldObject> {
        let forward = edge_id(start, end);
        let key = if self.edges.contains_key(&forward) || !self.bidirectional {
            forward
        } else {
            edge_id(end, start)
        };
        self.edges.get_mut(&key)
    }

    pub fn is_traversable(&self, start: &str, end: &str) -> bool {
        self.edge(start, end).map(|e| e.is("edge")).unwrap_or(false)
    }

    pub fn distance(&self, start: &str, end: &str) -> Option<Decimal> {
        self.edge(start, end).and_then(|e| e.number("distance"))
    }

    /// Outgoing `(neighbour, edge)` pairs, including reversed edges on bidirectional graphs
    pub fn neighbours<'a>(
        &'a self,
        node: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a WorldObject)> + 'a {
        self.edges.iter().filter_map(move |(id, edge)| {
            let (start, end) = split_edge_id(id)?;
            if start == node {
                Some((end, edge))
            } else if self.bidirectional && end == node {
                Some((start, edge))
            } else {
                None
            }
        })
    }

    /// Ids of every edge with `node` at either end
    pub fn edges_touching(&self, node: &str) -> Vec<String> {
        self.edges
            .keys()
            .filter(|id| {
                split_edge_id(id)
                    .map(|(s, e)| s == node || e == node)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn remove_edges_touching(&mut self, node: &str) {
        for id in self.edges_touching(node) {
            self.edges.remove(&id);
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| SimError::InvalidModel("graph must be an object".into()))?;
        let bidirectional = map
            .get("bidirectional")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut edges = BTreeMap::new();
        if let Some(raw) = map.get("edges").and_then(Value::as_object) {
            for (id, edge) in raw {
                if split_edge_id(id).is_none() {
                    return Err(SimError::InvalidModel(format!(
                        "edge id must be \"start end\": {:?}",
                        id
                    )));
                }
                edges.insert(id.clone(), WorldObject::from_json(edge)?);
            }
        }
        Ok(Self {
            bidirectional,
            edges,
        })
    }

    pub fn to_json(&self) -> Result<Value> {
        let mut edges = serde_json::Map::new();
        for (id, edge) in &self.edges {
            edges.insert(id.clone(), edge.to_json()?);
        }
        let mut map = serde_json::Map::new();
        map.insert("bidirectional".into(), Value::Bool(self.bidirectional));
        map.insert("edges".into(), Value::Object(edges));
        Ok(Value::Object(map))
    }
}
