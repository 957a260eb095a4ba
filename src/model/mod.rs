//! Typed world model
//!
//! The model is the single mutable document a simulation run works on. Every
//! object is stored under its kind (`agent`, `room`, `civilian`, ...) with a
//! known/unknown split; the movement graph, goals, planner assumptions and
//! scheduled events sit alongside.

pub mod event;
pub mod facts;
pub mod graph;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Result, SimError};

pub use event::{Event, EventKind, EventPredicate};
pub use facts::{Fact, Facts, UnknownFact, WorldObject};
pub use graph::{edge_id, is_temp_node, split_edge_id, temp_node_id, Graph};

/// Objective the planner optimises, e.g. `minimize (total-time)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Metric {
    #[serde(rename = "type")]
    pub direction: String,
    pub predicate: Vec<String>,
}

impl Default for Metric {
    fn default() -> Self {
        Self {
            direction: "minimize".into(),
            predicate: vec!["total-time".into()],
        }
    }
}

/// How many hard goals hold in the current model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalAchievement {
    pub achieved: usize,
    pub total: usize,
}

impl GoalAchievement {
    /// Achieved share of the goals; a problem with no goals counts as achieved
    pub fn fraction(&self) -> Decimal {
        if self.total == 0 {
            Decimal::ONE
        } else {
            Decimal::from(self.achieved as u64) / Decimal::from(self.total as u64)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.achieved == self.total
    }
}

impl fmt::Display for GoalAchievement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.achieved, self.total)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    /// Name of the domain the problem belongs to (`janitor`, `roborescue`)
    pub domain: String,
    /// kind -> id -> object
    pub objects: BTreeMap<String, BTreeMap<String, WorldObject>>,
    pub graph: Graph,
    /// Hard goals as predicate tuples, e.g. `["cleaned", "rm-0-0"]`
    pub goals: Vec<Vec<String>>,
    /// Values shown to planners for facts that are still unknown
    pub assumed_values: BTreeMap<String, Fact>,
    pub metric: Option<Metric>,
    pub events: Vec<Event>,
}

impl Model {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Self::default()
        }
    }

    pub fn with_object(mut self, kind: &str, id: &str, object: WorldObject) -> Self {
        self.insert_object(kind, id, object);
        self
    }

    pub fn with_goal(mut self, goal: &[&str]) -> Self {
        self.goals.push(goal.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn insert_object(&mut self, kind: &str, id: &str, object: WorldObject) {
        self.objects
            .entry(kind.to_string())
            .or_default()
            .insert(id.to_string(), object);
    }

    pub fn contains_object(&self, id: &str) -> bool {
        self.find_object(id).is_some()
    }

    pub fn find_object(&self, id: &str) -> Option<&WorldObject> {
        self.objects.values().find_map(|objects| objects.get(id))
    }

    pub fn find_object_mut(&mut self, id: &str) -> Option<&mut WorldObject> {
        self.objects
            .values_mut()
            .find_map(|objects| objects.get_mut(id))
    }

    pub fn object(&self, id: &str) -> Result<&WorldObject> {
        self.find_object(id)
            .ok_or_else(|| SimError::UnknownObject(id.to_string()))
    }

    pub fn object_mut(&mut self, id: &str) -> Result<&mut WorldObject> {
        self.find_object_mut(id)
            .ok_or_else(|| SimError::UnknownObject(id.to_string()))
    }

    pub fn object_kind(&self, id: &str) -> Option<&str> {
        self.objects
            .iter()
            .find(|(_, objects)| objects.contains_key(id))
            .map(|(kind, _)| kind.as_str())
    }

    pub fn remove_object(&mut self, id: &str) -> Option<WorldObject> {
        self.objects
            .values_mut()
            .find_map(|objects| objects.remove(id))
    }

    /// Objects of one kind, in id order
    pub fn objects_of<'a>(
        &'a self,
        kind: &str,
    ) -> impl Iterator<Item = (&'a String, &'a WorldObject)> + 'a {
        self.objects.get(kind).into_iter().flat_map(|m| m.iter())
    }

    /// Ids of all objects of the given kinds, in kind then id order
    pub fn ids_of(&self, kinds: &[&str]) -> Vec<String> {
        kinds
            .iter()
            .flat_map(|kind| self.objects_of(kind).map(|(id, _)| id.clone()))
            .collect()
    }

    /// Node the object is at, if it has a location
    pub fn location_of(&self, id: &str) -> Option<&str> {
        self.find_object(id).and_then(WorldObject::location)
    }

    pub fn set_location(&mut self, id: &str, node: &str) -> Result<()> {
        self.object_mut(id)?.set("at", Fact::located(node));
        Ok(())
    }

    /// Reveal every unknown fact visible from `node`
    ///
    /// Objects with id `node` or located at `node` are observed, as are edges
    /// with `node` at either end. Returns the ids whose revealed values differ
    /// from what planners assumed.
    pub fn observe(&mut self, node: &str) -> Vec<String> {
        let mut changed = Vec::new();
        let assumptions = &self.assumed_values;

        for objects in self.objects.values_mut() {
            for (id, object) in objects.iter_mut() {
                if object.unknown.is_empty() {
                    continue;
                }
                if (id == node || object.location() == Some(node))
                    && object.resolve_unknown(assumptions)
                {
                    changed.push(id.clone());
                }
            }
        }

        for (id, edge) in self.graph.edges.iter_mut() {
            if edge.unknown.is_empty() {
                continue;
            }
            let touches = split_edge_id(id)
                .map(|(s, e)| s == node || e == node)
                .unwrap_or(false);
            if touches && edge.resolve_unknown(assumptions) {
                changed.push(id.clone());
            }
        }

        changed
    }

    /// Deep copy showing planners' assumptions in place of unknown facts
    pub fn hypothesis(&self) -> Model {
        let mut model = self.clone();
        for objects in model.objects.values_mut() {
            for object in objects.values_mut() {
                *object = object.assumed(&self.assumed_values);
            }
        }
        for edge in model.graph.edges.values_mut() {
            *edge = edge.assumed(&self.assumed_values);
        }
        model
    }

    /// True if some object's known facts produce the goal tuple
    pub fn is_goal_achieved(&self, goal: &[String]) -> bool {
        let Some(predicate) = goal.first() else {
            return true;
        };
        self.objects.values().flat_map(|m| m.iter()).any(|(id, object)| {
            object
                .known
                .get(predicate)
                .and_then(|fact| fact.goal_tuple(predicate, id))
                .map(|tuple| tuple == goal)
                .unwrap_or(false)
        })
    }

    pub fn goal_achievement(&self) -> GoalAchievement {
        GoalAchievement {
            achieved: self
                .goals
                .iter()
                .filter(|g| self.is_goal_achieved(g))
                .count(),
            total: self.goals.len(),
        }
    }

    pub fn unmet_goals(&self) -> Vec<Vec<String>> {
        self.goals
            .iter()
            .filter(|g| !self.is_goal_achieved(g))
            .cloned()
            .collect()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| SimError::InvalidModel("model must be a JSON object".into()))?;

        let mut model = Model::new(
            root.get("domain")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );

        if let Some(kinds) = root.get("objects").and_then(Value::as_object) {
            for (kind, objects) in kinds {
                let objects = objects.as_object().ok_or_else(|| {
                    SimError::InvalidModel(format!("objects.{} must be an object", kind))
                })?;
                for (id, object) in objects {
                    model.insert_object(kind, id, WorldObject::from_json(object)?);
                }
            }
        }

        if let Some(agents) = root.get("agents").and_then(Value::as_object) {
            for (id, object) in agents {
                model.insert_object("agent", id, WorldObject::from_json(object)?);
            }
        }

        if let Some(graph) = root.get("graph") {
            model.graph = Graph::from_json(graph)?;
        }

        if let Some(goals) = root
            .get("goal")
            .and_then(|g| g.get("hard-goals"))
            .and_then(Value::as_array)
        {
            for goal in goals {
                let items = goal.as_array().ok_or_else(|| {
                    SimError::InvalidModel(format!("goal must be a list: {}", goal))
                })?;
                let tuple = items
                    .iter()
                    .map(|item| Fact::from_json(item).map(|f| f.to_string()))
                    .collect::<Result<Vec<_>>>()?;
                model.goals.push(tuple);
            }
        }

        if let Some(assumed) = root.get("assumed-values").and_then(Value::as_object) {
            for (name, value) in assumed {
                model
                    .assumed_values
                    .insert(name.clone(), Fact::from_json(value)?);
            }
        }

        if let Some(metric) = root.get("metric") {
            if !metric.is_null() {
                model.metric = Some(serde_json::from_value(metric.clone())?);
            }
        }

        if let Some(events) = root.get("events") {
            model.events = serde_json::from_value(events.clone())?;
        }

        Ok(model)
    }

    pub fn to_json(&self) -> Result<Value> {
        let mut kinds = serde_json::Map::new();
        for (kind, objects) in &self.objects {
            let mut map = serde_json::Map::new();
            for (id, object) in objects {
                map.insert(id.clone(), object.to_json()?);
            }
            kinds.insert(kind.clone(), Value::Object(map));
        }

        let mut assumed = serde_json::Map::new();
        for (name, value) in &self.assumed_values {
            assumed.insert(name.clone(), value.to_json()?);
        }

        let goals = self
            .goals
            .iter()
            .map(|g| Value::Array(g.iter().cloned().map(Value::String).collect()))
            .collect();

        let mut root = serde_json::Map::new();
        root.insert("domain".into(), Value::String(self.domain.clone()));
        root.insert("objects".into(), Value::Object(kinds));
        root.insert("graph".into(), self.graph.to_json()?);
        root.insert(
            "goal".into(),
            serde_json::json!({ "hard-goals": Value::Array(goals) }),
        );
        root.insert("assumed-values".into(), Value::Object(assumed));
        root.insert("metric".into(), serde_json::to_value(&self.metric)?);
        root.insert("events".into(), serde_json::to_value(&self.events)?);
        Ok(Value::Object(root))
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }
}
