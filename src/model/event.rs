//! Exogenous world changes scheduled at fixed times

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::facts::Fact;
use super::Model;
use crate::core::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Object,
    Edge,
}

/// One fact rewrite carried by an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventPredicate {
    pub name: String,
    pub becomes: Fact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was: Option<Fact>,
}

/// A deterministic change to an object or edge at `time`
///
/// Hidden events still happen but are never shown to planners.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Event {
    pub time: Decimal,
    pub id: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: EventKind,
    pub predicates: Vec<EventPredicate>,
    #[serde(default)]
    pub hidden: bool,
}

fn default_kind() -> EventKind {
    EventKind::Object
}

impl Event {
    pub fn new(time: Decimal, kind: EventKind, id: &str) -> Self {
        Self {
            time,
            id: id.to_string(),
            kind,
            predicates: Vec::new(),
            hidden: false,
        }
    }

    pub fn with_predicate(mut self, name: &str, becomes: impl Into<Fact>) -> Self {
        self.predicates.push(EventPredicate {
            name: name.to_string(),
            becomes: becomes.into(),
            was: None,
        });
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Edge-clearing event published by an agent that plans to unblock it
    pub fn edge_cleared(time: Decimal, start: &str, end: &str) -> Self {
        Event::new(time, EventKind::Edge, &super::graph::edge_id(start, end))
            .with_predicate("edge", true)
            .with_predicate("blocked-edge", false)
    }

    /// Write the event's facts into the model and return the changed id
    pub fn apply(&self, model: &mut Model) -> Result<String> {
        let target = match self.kind {
            EventKind::Object => model
                .find_object_mut(&self.id)
                .ok_or_else(|| SimError::UnknownObject(self.id.clone()))?,
            EventKind::Edge => model
                .graph
                .edges
                .get_mut(&self.id)
                .ok_or_else(|| SimError::UnknownEdge(self.id.clone()))?,
        };
        for predicate in &self.predicates {
            target.set(&predicate.name, predicate.becomes.clone());
        }
        Ok(self.id.clone())
    }

    /// Whether any predicate makes `name` become `value`
    pub fn sets(&self, name: &str, value: &Fact) -> bool {
        self.predicates
            .iter()
            .any(|p| p.name == name && &p.becomes == value)
    }
}
