//! Known and unknown facts
//!
//! A fact is a small JSON-shaped value. Numbers are always exact decimals;
//! conversion from JSON goes through the number's text, never through `f64`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::core::error::{Result, SimError};

/// A single world-model value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fact {
    Bool(bool),
    Number(Decimal),
    Name(String),
    List(Vec<Fact>),
}

/// Named facts of one object
pub type Facts = BTreeMap<String, Fact>;

impl Fact {
    /// The `[true, node]` form used for located predicates such as `at`
    pub fn located(node: &str) -> Self {
        Fact::List(vec![Fact::Bool(true), Fact::Name(node.to_string())])
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Fact::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Fact::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Fact::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Target of a located predicate, e.g. `"rm-1-1"` for `[true, "rm-1-1"]`
    pub fn located_at(&self) -> Option<&str> {
        match self {
            Fact::List(items) => items.iter().find_map(Fact::as_name),
            Fact::Name(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Fact::Bool(true))
    }

    /// Goal tuple contributed by this fact when held by `object` under `predicate`
    ///
    /// `true` stands for the holding object itself.
    pub fn goal_tuple(&self, predicate: &str, object: &str) -> Option<Vec<String>> {
        let mut tuple = vec![predicate.to_string()];
        match self {
            Fact::Bool(true) => tuple.push(object.to_string()),
            Fact::Bool(false) => return None,
            Fact::Number(_) => return None,
            Fact::Name(s) => tuple.push(s.clone()),
            Fact::List(items) => {
                for item in items {
                    match item {
                        Fact::Bool(true) => tuple.push(object.to_string()),
                        Fact::Name(s) => tuple.push(s.clone()),
                        Fact::Number(n) => tuple.push(n.normalize().to_string()),
                        _ => return None,
                    }
                }
            }
        }
        Some(tuple)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(Fact::Bool(*b)),
            Value::Number(n) => Ok(Fact::Number(decimal_from_json(n)?)),
            Value::String(s) => Ok(Fact::Name(s.clone())),
            Value::Array(items) => Ok(Fact::List(
                items.iter().map(Fact::from_json).collect::<Result<_>>()?,
            )),
            other => Err(SimError::InvalidModel(format!(
                "unsupported fact value: {}",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            Fact::Bool(b) => Value::Bool(*b),
            Fact::Number(n) => Value::Number(decimal_to_json(*n)?),
            Fact::Name(s) => Value::String(s.clone()),
            Fact::List(items) => {
                Value::Array(items.iter().map(Fact::to_json).collect::<Result<_>>()?)
            }
        })
    }
}

impl From<bool> for Fact {
    fn from(b: bool) -> Self {
        Fact::Bool(b)
    }
}

impl From<Decimal> for Fact {
    fn from(n: Decimal) -> Self {
        Fact::Number(n)
    }
}

impl From<&str> for Fact {
    fn from(s: &str) -> Self {
        Fact::Name(s.to_string())
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Bool(b) => write!(f, "{}", b),
            Fact::Number(n) => write!(f, "{}", n.normalize()),
            Fact::Name(s) => write!(f, "{}", s),
            Fact::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Serialize for Fact {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Fact {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Fact::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Exact decimal from a JSON number
pub fn decimal_from_json(number: &serde_json::Number) -> Result<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| SimError::InvalidModel(format!("bad number {}: {}", text, e)))
}

/// JSON number carrying the exact decimal text
pub fn decimal_to_json(value: Decimal) -> Result<serde_json::Number> {
    Ok(serde_json::Number::from_str(&value.normalize().to_string())?)
}

/// A fact whose true value is hidden until observed
///
/// `values` holds the possible apparent values by key; `actual` is either a
/// literal value or one of those keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnknownFact {
    pub actual: Fact,
    pub values: BTreeMap<String, Fact>,
}

impl UnknownFact {
    pub fn new(actual: impl Into<Fact>) -> Self {
        Self {
            actual: actual.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: &str, value: impl Into<Fact>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    fn resolve<'a>(&'a self, value: &'a Fact) -> &'a Fact {
        match value {
            Fact::Name(key) => self.values.get(key).unwrap_or(value),
            _ => value,
        }
    }

    /// Ground truth revealed by observation
    pub fn actual_value(&self) -> Fact {
        self.resolve(&self.actual).clone()
    }

    /// Value presented to planners before observation
    ///
    /// An explicit `assumed` entry wins, then the model-wide assumption for
    /// this fact name. With neither the fact is hidden entirely.
    pub fn assumed_value(&self, assumption: Option<&Fact>) -> Option<Fact> {
        if let Some(value) = self.values.get("assumed") {
            return Some(value.clone());
        }
        assumption.map(|a| self.resolve(a).clone())
    }

    /// True if observing this fact tells planners something they did not assume
    pub fn is_new_knowledge(&self, assumption: Option<&Fact>) -> bool {
        match self.assumed_value(assumption) {
            Some(assumed) => assumed != self.actual_value(),
            None => true,
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            SimError::InvalidModel(format!("unknown fact must be an object: {}", value))
        })?;
        let actual = map
            .get("actual")
            .ok_or_else(|| SimError::InvalidModel("unknown fact without actual".into()))?;
        let mut values = BTreeMap::new();
        for (key, v) in map {
            if key != "actual" {
                values.insert(key.clone(), Fact::from_json(v)?);
            }
        }
        Ok(Self {
            actual: Fact::from_json(actual)?,
            values,
        })
    }

    pub fn to_json(&self) -> Result<Value> {
        let mut map = serde_json::Map::new();
        map.insert("actual".into(), self.actual.to_json()?);
        for (key, v) in &self.values {
            map.insert(key.clone(), v.to_json()?);
        }
        Ok(Value::Object(map))
    }
}

/// Two-tier knowledge about an object or edge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldObject {
    pub known: Facts,
    pub unknown: BTreeMap<String, UnknownFact>,
}

impl WorldObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fact(mut self, name: &str, value: impl Into<Fact>) -> Self {
        self.known.insert(name.to_string(), value.into());
        self
    }

    pub fn with_unknown(mut self, name: &str, fact: UnknownFact) -> Self {
        self.unknown.insert(name.to_string(), fact);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Fact> {
        self.known.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Fact>) {
        self.known.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Fact> {
        self.known.remove(name)
    }

    pub fn is(&self, name: &str) -> bool {
        self.known.get(name).map(Fact::is_true).unwrap_or(false)
    }

    pub fn number(&self, name: &str) -> Option<Decimal> {
        self.known.get(name).and_then(Fact::as_number)
    }

    pub fn location(&self) -> Option<&str> {
        self.known.get("at").and_then(Fact::located_at)
    }

    /// Move every unknown fact into `known`
    ///
    /// Returns true if any revealed value differs from what planners assumed.
    pub fn resolve_unknown(&mut self, assumptions: &BTreeMap<String, Fact>) -> bool {
        let unknown = std::mem::take(&mut self.unknown);
        let mut changed = false;
        for (name, fact) in unknown {
            changed |= fact.is_new_knowledge(assumptions.get(&name));
            self.known.insert(name, fact.actual_value());
        }
        changed
    }

    /// Copy with unknowns replaced by the values planners assume
    pub fn assumed(&self, assumptions: &BTreeMap<String, Fact>) -> WorldObject {
        let mut known = self.known.clone();
        for (name, fact) in &self.unknown {
            if let Some(value) = fact.assumed_value(assumptions.get(name)) {
                known.insert(name.clone(), value);
            }
        }
        WorldObject {
            known,
            unknown: BTreeMap::new(),
        }
    }

    /// Accepts both `{known, unknown}` and a bare map of known facts
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            SimError::InvalidModel(format!("object must be a JSON object: {}", value))
        })?;

        let structured = map.contains_key("known") || map.contains_key("unknown");
        let mut object = WorldObject::new();
        if structured {
            if let Some(known) = map.get("known").and_then(Value::as_object) {
                for (name, v) in known {
                    object.known.insert(name.clone(), Fact::from_json(v)?);
                }
            }
            if let Some(unknown) = map.get("unknown").and_then(Value::as_object) {
                for (name, v) in unknown {
                    object
                        .unknown
                        .insert(name.clone(), UnknownFact::from_json(v)?);
                }
            }
        } else {
            for (name, v) in map {
                object.known.insert(name.clone(), Fact::from_json(v)?);
            }
        }
        Ok(object)
    }

    pub fn to_json(&self) -> Result<Value> {
        let mut known = serde_json::Map::new();
        for (name, fact) in &self.known {
            known.insert(name.clone(), fact.to_json()?);
        }
        let mut unknown = serde_json::Map::new();
        for (name, fact) in &self.unknown {
            unknown.insert(name.clone(), fact.to_json()?);
        }
        let mut map = serde_json::Map::new();
        map.insert("known".into(), Value::Object(known));
        map.insert("unknown".into(), Value::Object(unknown));
        Ok(Value::Object(map))
    }
}
