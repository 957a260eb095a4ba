//! Actions agents perform
//!
//! `Action` is a closed sum type. Every variant is an immutable record with a
//! `Timing` plus its own fields; changes happen only through the `with_*`
//! copy constructors. Variants are declared in tie-break order, so the derived
//! `Ord` compares the kind ordinal before any field.

pub mod catalog;
pub mod knowledge;
pub mod movement;
pub mod planning;
pub mod rescue;
pub mod work;

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::allocation::Bid;
use crate::core::accuracy::as_end_time;
use crate::core::error::{Result, SimError};
use crate::model::Model;

pub use catalog::{kebab_case, ActionCatalog, ActionType};
pub use knowledge::{EventAction, Observe};
pub use movement::Move;
pub use planning::{Allocate, LocalPlan, Plan};
pub use rescue::{Load, Rescue, Unblock, Unload};
pub use work::{Clean, ExtraClean, ExtraCleanPart};

/// Start, duration and partial flag shared by every action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Timing {
    start_time: Decimal,
    duration: Decimal,
    partial: bool,
}

impl Timing {
    pub fn new(start_time: Decimal, duration: Decimal) -> Self {
        Self {
            start_time,
            duration,
            partial: false,
        }
    }

    pub fn start_time(&self) -> Decimal {
        self.start_time
    }

    pub fn duration(&self) -> Decimal {
        self.duration
    }

    pub fn partial(&self) -> bool {
        self.partial
    }

    /// Last instant the action occupies
    pub fn end_time(&self) -> Decimal {
        as_end_time(self.start_time + self.duration)
    }

    pub fn with_start_time(self, start_time: Decimal) -> Self {
        Self { start_time, ..self }
    }

    pub fn with_duration(self, duration: Decimal) -> Self {
        Self { duration, ..self }
    }

    pub fn as_partial(self, duration: Decimal) -> Self {
        Self {
            duration,
            partial: true,
            ..self
        }
    }
}

/// Result of applying an action to the model
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Unchanged,
    /// Ids whose revealed state differs from what planners assumed
    Changed(Vec<String>),
    /// Plan carried by a planning action, times relative to its origin
    Plan(Vec<Action>),
    Allocation(Vec<Bid>),
    /// Record of how far an interrupted action got
    Partial(Box<Action>),
}

impl Effect {
    pub fn changed_ids(&self) -> &[String] {
        match self {
            Effect::Changed(ids) => ids,
            _ => &[],
        }
    }
}

/// Capability set every action variant implements
pub trait Operation {
    fn timing(&self) -> &Timing;

    /// Agents occupied by the action
    fn agents(&self) -> Vec<&str>;

    /// Positional arguments as they appear in a plan line
    fn args(&self) -> Vec<&str>;

    fn is_applicable(&self, model: &Model) -> bool;

    fn apply(&self, model: &mut Model) -> Result<Effect>;

    /// Commit the progress made by `deadline` and return a record of it
    fn partially_apply(&self, _model: &mut Model, _deadline: Decimal) -> Result<Option<Action>> {
        Ok(None)
    }

    /// Whether feasibility depends on the object or edge `id`
    fn is_affected_by_change(&self, _id: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type")]
pub enum Action {
    // ordinal 0
    #[serde(rename = "EventAction")]
    Events(EventAction),
    // ordinal 1
    Move(Move),
    // ordinal 2
    Observe(Observe),
    // ordinal 3
    Load(Load),
    Unload(Unload),
    Rescue(Rescue),
    Unblock(Unblock),
    // ordinal 4
    Plan(Plan),
    LocalPlan(LocalPlan),
    Allocate(Allocate),
    // ordinal 5
    Clean(Clean),
    ExtraClean(ExtraClean),
    ExtraCleanPart(ExtraCleanPart),
}

macro_rules! dispatch {
    ($action:expr, $inner:ident => $body:expr) => {
        match $action {
            Action::Events($inner) => $body,
            Action::Move($inner) => $body,
            Action::Observe($inner) => $body,
            Action::Load($inner) => $body,
            Action::Unload($inner) => $body,
            Action::Rescue($inner) => $body,
            Action::Unblock($inner) => $body,
            Action::Plan($inner) => $body,
            Action::LocalPlan($inner) => $body,
            Action::Allocate($inner) => $body,
            Action::Clean($inner) => $body,
            Action::ExtraClean($inner) => $body,
            Action::ExtraCleanPart($inner) => $body,
        }
    };
}

macro_rules! map_timing {
    ($action:expr, $timing:expr) => {
        match $action {
            Action::Events(a) => Action::Events(EventAction { timing: $timing, ..a.clone() }),
            Action::Move(a) => Action::Move(Move { timing: $timing, ..a.clone() }),
            Action::Observe(a) => Action::Observe(Observe { timing: $timing, ..a.clone() }),
            Action::Load(a) => Action::Load(Load { timing: $timing, ..a.clone() }),
            Action::Unload(a) => Action::Unload(Unload { timing: $timing, ..a.clone() }),
            Action::Rescue(a) => Action::Rescue(Rescue { timing: $timing, ..a.clone() }),
            Action::Unblock(a) => Action::Unblock(Unblock { timing: $timing, ..a.clone() }),
            Action::Plan(a) => Action::Plan(Plan { timing: $timing, ..a.clone() }),
            Action::LocalPlan(a) => Action::LocalPlan(LocalPlan { timing: $timing, ..a.clone() }),
            Action::Allocate(a) => Action::Allocate(Allocate { timing: $timing, ..a.clone() }),
            Action::Clean(a) => Action::Clean(Clean { timing: $timing, ..a.clone() }),
            Action::ExtraClean(a) => Action::ExtraClean(ExtraClean { timing: $timing, ..a.clone() }),
            Action::ExtraCleanPart(a) => {
                Action::ExtraCleanPart(ExtraCleanPart { timing: $timing, ..a.clone() })
            }
        }
    };
}

/// Which executor an action belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Agent(String),
    Coordinator,
    Events,
}

impl Action {
    pub fn timing(&self) -> &Timing {
        dispatch!(self, a => a.timing())
    }

    pub fn start_time(&self) -> Decimal {
        self.timing().start_time()
    }

    pub fn duration(&self) -> Decimal {
        self.timing().duration()
    }

    pub fn end_time(&self) -> Decimal {
        self.timing().end_time()
    }

    pub fn is_partial(&self) -> bool {
        self.timing().partial()
    }

    /// Tie-break rank among actions sharing a time and execution state
    pub fn ordinal(&self) -> u8 {
        match self {
            Action::Events(_) => 0,
            Action::Move(_) => 1,
            Action::Observe(_) => 2,
            Action::Load(_) | Action::Unload(_) | Action::Rescue(_) | Action::Unblock(_) => 3,
            Action::Plan(_) | Action::LocalPlan(_) | Action::Allocate(_) => 4,
            Action::Clean(_) | Action::ExtraClean(_) | Action::ExtraCleanPart(_) => 5,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Events(_) => "EventAction",
            Action::Move(_) => "Move",
            Action::Observe(_) => "Observe",
            Action::Load(_) => "Load",
            Action::Unload(_) => "Unload",
            Action::Rescue(_) => "Rescue",
            Action::Unblock(_) => "Unblock",
            Action::Plan(_) => "Plan",
            Action::LocalPlan(_) => "LocalPlan",
            Action::Allocate(_) => "Allocate",
            Action::Clean(_) => "Clean",
            Action::ExtraClean(_) => "ExtraClean",
            Action::ExtraCleanPart(_) => "ExtraCleanPart",
        }
    }

    pub fn agents(&self) -> Vec<&str> {
        dispatch!(self, a => a.agents())
    }

    pub fn args(&self) -> Vec<&str> {
        dispatch!(self, a => a.args())
    }

    pub fn owner(&self) -> Owner {
        match self {
            Action::Events(_) => Owner::Events,
            Action::Plan(_) | Action::Allocate(_) => Owner::Coordinator,
            other => other
                .agents()
                .first()
                .map(|a| Owner::Agent(a.to_string()))
                .unwrap_or(Owner::Coordinator),
        }
    }

    /// Meta actions that run planning or allocation
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Action::Plan(_) | Action::LocalPlan(_) | Action::Allocate(_)
        )
    }

    /// Domain actions that change the world, as opposed to bookkeeping
    pub fn is_physical(&self) -> bool {
        !self.is_planning() && !matches!(self, Action::Events(_) | Action::Observe(_))
    }

    /// Whether a halt may cut this action short
    pub fn is_interruptible(&self) -> bool {
        matches!(
            self,
            Action::Move(_)
                | Action::Unblock(_)
                | Action::Rescue(_)
                | Action::Clean(_)
                | Action::ExtraClean(_)
                | Action::ExtraCleanPart(_)
        )
    }

    pub fn is_applicable(&self, model: &Model) -> bool {
        dispatch!(self, a => a.is_applicable(model))
    }

    /// Mutate the model with this action's effect
    ///
    /// Partial actions commit only the progress made by their (shortened) end.
    pub fn apply(&self, model: &mut Model) -> Result<Effect> {
        if !self.is_applicable(model) {
            return Err(SimError::NotApplicable {
                time: self.end_time(),
                action: self.to_string(),
            });
        }
        if self.is_partial() {
            let deadline = self.start_time() + self.duration();
            return Ok(match self.partially_apply(model, deadline)? {
                Some(record) => Effect::Partial(Box::new(record)),
                None => Effect::Unchanged,
            });
        }
        dispatch!(self, a => a.apply(model))
    }

    pub fn partially_apply(&self, model: &mut Model, deadline: Decimal) -> Result<Option<Action>> {
        dispatch!(self, a => a.partially_apply(model, deadline))
    }

    pub fn is_affected_by_change(&self, id: &str) -> bool {
        dispatch!(self, a => a.is_affected_by_change(id))
    }

    pub fn with_start_time(&self, start_time: Decimal) -> Action {
        map_timing!(self, self.timing().with_start_time(start_time))
    }

    pub fn with_duration(&self, duration: Decimal) -> Action {
        map_timing!(self, self.timing().with_duration(duration))
    }

    /// Copy ending at `end` that only commits the progress made by then
    ///
    /// Actions that cannot be interrupted are returned unchanged.
    pub fn as_partial(&self, end: Decimal) -> Action {
        if !self.is_interruptible() {
            return self.clone();
        }
        let duration = end - self.start_time();
        map_timing!(self, self.timing().as_partial(duration))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(start_time={}, duration={}",
            self.type_name(),
            self.start_time(),
            self.duration()
        )?;
        for arg in self.args() {
            write!(f, ", {}", arg)?;
        }
        if self.is_partial() {
            write!(f, ", partial")?;
        }
        write!(f, ")")
    }
}

/// True if `agent` is located at `node`
pub(crate) fn agent_at(model: &Model, agent: &str, node: &str) -> bool {
    model.location_of(agent) == Some(node)
}
