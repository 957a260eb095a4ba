//! Action names and constructors used when decoding plans

use ahash::AHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Action, Clean, ExtraClean, ExtraCleanPart, Load, Move, Observe, Rescue, Unblock, Unload};
use crate::core::error::{Result, SimError};

/// Domain action kinds a planner may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Move,
    Observe,
    Clean,
    ExtraClean,
    ExtraCleanPart,
    Unblock,
    Load,
    Unload,
    Rescue,
}

impl ActionType {
    pub const ALL: [ActionType; 9] = [
        ActionType::Move,
        ActionType::Observe,
        ActionType::Clean,
        ActionType::ExtraClean,
        ActionType::ExtraCleanPart,
        ActionType::Unblock,
        ActionType::Load,
        ActionType::Unload,
        ActionType::Rescue,
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            ActionType::Move => "Move",
            ActionType::Observe => "Observe",
            ActionType::Clean => "Clean",
            ActionType::ExtraClean => "ExtraClean",
            ActionType::ExtraCleanPart => "ExtraCleanPart",
            ActionType::Unblock => "Unblock",
            ActionType::Load => "Load",
            ActionType::Unload => "Unload",
            ActionType::Rescue => "Rescue",
        }
    }

    /// Name used in PDDL plan lines
    pub fn pddl_name(&self) -> String {
        kebab_case(self.type_name())
    }

    /// Number of positional arguments in a plan line
    pub fn arity(&self) -> usize {
        match self {
            ActionType::Observe | ActionType::Clean | ActionType::ExtraCleanPart => 2,
            ActionType::Move
            | ActionType::ExtraClean
            | ActionType::Unblock
            | ActionType::Load
            | ActionType::Unload
            | ActionType::Rescue => 3,
        }
    }

    pub fn build(&self, start_time: Decimal, duration: Decimal, args: &[String]) -> Result<Action> {
        if args.len() != self.arity() {
            return Err(SimError::PlanDecode(format!(
                "{} expects {} arguments, got {:?}",
                self.pddl_name(),
                self.arity(),
                args
            )));
        }
        let a = |i: usize| args[i].as_str();
        Ok(match self {
            ActionType::Move => Action::Move(Move::new(start_time, duration, a(0), a(1), a(2))),
            ActionType::Observe => Action::Observe(Observe::new(start_time, a(0), a(1))),
            ActionType::Clean => Action::Clean(Clean::new(start_time, duration, a(0), a(1))),
            ActionType::ExtraClean => {
                Action::ExtraClean(ExtraClean::new(start_time, duration, a(0), a(1), a(2)))
            }
            ActionType::ExtraCleanPart => {
                Action::ExtraCleanPart(ExtraCleanPart::new(start_time, duration, a(0), a(1)))
            }
            ActionType::Unblock => Action::Unblock(Unblock::new(start_time, duration, a(0), a(1), a(2))),
            ActionType::Load => Action::Load(Load::new(start_time, duration, a(0), a(1), a(2))),
            ActionType::Unload => Action::Unload(Unload::new(start_time, duration, a(0), a(1), a(2))),
            ActionType::Rescue => Action::Rescue(Rescue::new(start_time, duration, a(0), a(1), a(2))),
        })
    }
}

/// `ExtraCleanPart` -> `extra-clean-part`
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Lookup from PDDL action names to the kinds a domain supports
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    by_name: AHashMap<String, ActionType>,
}

impl ActionCatalog {
    pub fn new(types: &[ActionType]) -> Self {
        Self {
            by_name: types.iter().map(|t| (t.pddl_name(), *t)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<ActionType> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn build(
        &self,
        name: &str,
        start_time: Decimal,
        duration: Decimal,
        args: &[String],
    ) -> Result<Action> {
        self.get(name)
            .ok_or_else(|| SimError::PlanDecode(format!("unknown action: {}", name)))?
            .build(start_time, duration, args)
    }
}
