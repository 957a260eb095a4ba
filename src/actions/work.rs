//! Cleaning work on rooms
//!
//! Rooms carry a `dirtiness` counter of remaining work. Interrupting a clean
//! subtracts the elapsed work; if nothing would be left the room is simply
//! cleaned.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::{agent_at, Action, Effect, Operation, Timing};
use crate::core::error::Result;
use crate::model::Model;

const DIRTINESS: &str = "dirtiness";

fn mark_cleaned(model: &mut Model, room: &str) -> Result<()> {
    let room = model.object_mut(room)?;
    room.set("cleaned", true);
    room.set(DIRTINESS, Decimal::ZERO);
    room.remove("dirty");
    room.remove("extra-dirty");
    Ok(())
}

/// Take `work` off the room's dirtiness. Returns true if that finished the room.
fn reduce_dirtiness(model: &mut Model, room: &str, work: Decimal, action: &Action) -> Result<bool> {
    let remaining = model.object(room)?.number(DIRTINESS).unwrap_or_default() - work;
    if remaining <= Decimal::ZERO {
        info!(%action, "could have completed in less time than allotted");
        mark_cleaned(model, room)?;
        Ok(true)
    } else {
        model.object_mut(room)?.set(DIRTINESS, remaining);
        Ok(false)
    }
}

fn elapsed(timing: &Timing, deadline: Decimal) -> Decimal {
    deadline - timing.start_time()
}

/// Timing of the work actually done by `deadline`; partial unless it finished the room
fn progress(timing: &Timing, deadline: Decimal, finished: bool) -> Timing {
    let spent = elapsed(timing, deadline);
    if finished {
        Timing::new(timing.start_time(), spent)
    } else {
        timing.as_partial(spent)
    }
}

/// One agent cleaning a dirty room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Clean {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub room: String,
}

impl Clean {
    pub fn new(start_time: Decimal, duration: Decimal, agent: &str, room: &str) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            room: room.to_string(),
        }
    }
}

impl Operation for Clean {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.room]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        agent_at(model, &self.agent, &self.room)
            && model
                .find_object(&self.room)
                .map(|room| room.is("dirty"))
                .unwrap_or(false)
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        mark_cleaned(model, &self.room)?;
        Ok(Effect::Unchanged)
    }

    fn partially_apply(&self, model: &mut Model, deadline: Decimal) -> Result<Option<Action>> {
        let work = elapsed(&self.timing, deadline);
        if work <= Decimal::ZERO {
            return Ok(None);
        }
        let finished = reduce_dirtiness(model, &self.room, work, &Action::Clean(self.clone()))?;
        Ok(Some(Action::Clean(Self {
            timing: progress(&self.timing, deadline, finished),
            ..self.clone()
        })))
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        id == self.room
    }
}

/// Two agents cleaning an extra-dirty room together
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExtraClean {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub agent2: String,
    pub room: String,
}

impl ExtraClean {
    pub fn new(
        start_time: Decimal,
        duration: Decimal,
        agent: &str,
        agent2: &str,
        room: &str,
    ) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            agent2: agent2.to_string(),
            room: room.to_string(),
        }
    }
}

impl Operation for ExtraClean {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent, &self.agent2]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.agent2, &self.room]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        agent_at(model, &self.agent, &self.room)
            && agent_at(model, &self.agent2, &self.room)
            && model
                .find_object(&self.room)
                .map(|room| room.is("extra-dirty"))
                .unwrap_or(false)
    }

    fn apply(&self, model: &mut Model) -> Result<Effect> {
        mark_cleaned(model, &self.room)?;
        Ok(Effect::Unchanged)
    }

    fn partially_apply(&self, model: &mut Model, deadline: Decimal) -> Result<Option<Action>> {
        let work = elapsed(&self.timing, deadline);
        if work <= Decimal::ZERO {
            return Ok(None);
        }
        let finished = reduce_dirtiness(model, &self.room, work, &Action::ExtraClean(self.clone()))?;
        Ok(Some(Action::ExtraClean(Self {
            timing: progress(&self.timing, deadline, finished),
            ..self.clone()
        })))
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        id == self.room
    }
}

/// One agent's share of cleaning an extra-dirty room, working at half rate
///
/// Two shares of the room's dirtiness finish it, whether done together or in turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExtraCleanPart {
    #[serde(flatten)]
    pub timing: Timing,
    pub agent: String,
    pub room: String,
}

impl ExtraCleanPart {
    pub fn new(start_time: Decimal, duration: Decimal, agent: &str, room: &str) -> Self {
        Self {
            timing: Timing::new(start_time, duration),
            agent: agent.to_string(),
            room: room.to_string(),
        }
    }

    fn work(&self, model: &mut Model, time_spent: Decimal) -> Result<bool> {
        reduce_dirtiness(
            model,
            &self.room,
            time_spent / Decimal::TWO,
            &Action::ExtraCleanPart(self.clone()),
        )
    }
}

impl Operation for ExtraCleanPart {
    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn agents(&self) -> Vec<&str> {
        vec![&self.agent]
    }

    fn args(&self) -> Vec<&str> {
        vec![&self.agent, &self.room]
    }

    fn is_applicable(&self, model: &Model) -> bool {
        agent_at(model, &self.agent, &self.room)
            && model
                .find_object(&self.room)
                .map(|room| room.is("extra-dirty"))
                .unwrap_or(false)
    }

    /// Finishing the room changes what other agents sharing it can do
    fn apply(&self, model: &mut Model) -> Result<Effect> {
        if self.work(model, self.timing.duration())? {
            Ok(Effect::Changed(vec![self.room.clone()]))
        } else {
            Ok(Effect::Unchanged)
        }
    }

    fn partially_apply(&self, model: &mut Model, deadline: Decimal) -> Result<Option<Action>> {
        let work = elapsed(&self.timing, deadline);
        if work <= Decimal::ZERO {
            return Ok(None);
        }
        let finished = self.work(model, work)?;
        Ok(Some(Action::ExtraCleanPart(Self {
            timing: progress(&self.timing, deadline, finished),
            ..self.clone()
        })))
    }

    fn is_affected_by_change(&self, id: &str) -> bool {
        id == self.room
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fact, WorldObject};
    use proptest::prelude::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn room_model(flag: &str, dirtiness: Decimal) -> Model {
        Model::new("janitor")
            .with_object("agent", "agent1", WorldObject::new().with_fact("at", Fact::located("rm")))
            .with_object("agent", "agent2", WorldObject::new().with_fact("at", Fact::located("rm")))
            .with_object(
                "room",
                "rm",
                WorldObject::new()
                    .with_fact(flag, true)
                    .with_fact("cleaned", false)
                    .with_fact("dirtiness", dirtiness),
            )
    }

    fn dirtiness(model: &Model) -> Decimal {
        model.find_object("rm").unwrap().number("dirtiness").unwrap()
    }

    #[test]
    fn test_clean_completes_room() {
        let mut model = room_model("dirty", d("5"));
        Action::Clean(Clean::new(d("0"), d("5"), "agent1", "rm"))
            .apply(&mut model)
            .unwrap();
        let room = model.find_object("rm").unwrap();
        assert!(room.is("cleaned"));
        assert!(room.get("dirty").is_none());
    }

    #[test]
    fn test_partial_clean_reduces_dirtiness() {
        let mut model = room_model("dirty", d("5"));
        let partial = Action::Clean(Clean::new(d("1"), d("5"), "agent1", "rm")).as_partial(d("3"));
        partial.apply(&mut model).unwrap();
        assert_eq!(dirtiness(&model), d("3"));
        assert!(!model.find_object("rm").unwrap().is("cleaned"));
    }

    #[test]
    fn test_partial_clean_records_work_done() {
        let mut model = room_model("dirty", d("5"));
        let partial = Action::Clean(Clean::new(d("1"), d("5"), "agent1", "rm")).as_partial(d("3"));
        let Effect::Partial(record) = partial.apply(&mut model).unwrap() else {
            panic!("expected a progress record");
        };
        assert!(record.is_partial());
        assert_eq!(record.start_time(), d("1"));
        assert_eq!(record.duration(), d("2"));
    }

    #[test]
    fn test_partial_part_that_finishes_room_is_recorded_complete() {
        let mut model = room_model("extra-dirty", d("1"));
        let part = ExtraCleanPart::new(d("0"), d("4"), "agent1", "rm");
        let record = part.partially_apply(&mut model, d("3")).unwrap().unwrap();
        assert!(!record.is_partial());
        assert_eq!(record.duration(), d("3"));
        assert!(model.find_object("rm").unwrap().is("cleaned"));
    }

    #[test]
    fn test_partial_clean_overshoot_completes() {
        let mut model = room_model("dirty", d("2"));
        let partial = Action::Clean(Clean::new(d("1"), d("5"), "agent1", "rm")).as_partial(d("3.5"));
        partial.apply(&mut model).unwrap();
        assert!(model.find_object("rm").unwrap().is("cleaned"));
    }

    #[test]
    fn test_extra_clean_needs_both_agents() {
        let mut model = room_model("extra-dirty", d("4"));
        let action = Action::ExtraClean(ExtraClean::new(d("0"), d("4"), "agent1", "agent2", "rm"));
        assert!(action.is_applicable(&model));
        model.set_location("agent2", "elsewhere").unwrap();
        assert!(!action.is_applicable(&model));
    }

    #[test]
    fn test_two_extra_clean_parts_finish_room() {
        let mut model = room_model("extra-dirty", d("4"));
        let first = Action::ExtraCleanPart(ExtraCleanPart::new(d("0"), d("4"), "agent1", "rm"));
        assert_eq!(first.apply(&mut model).unwrap(), Effect::Unchanged);
        assert_eq!(dirtiness(&model), d("2"));

        let second = Action::ExtraCleanPart(ExtraCleanPart::new(d("0"), d("4"), "agent2", "rm"));
        assert_eq!(
            second.apply(&mut model).unwrap(),
            Effect::Changed(vec!["rm".to_string()])
        );
        assert!(model.find_object("rm").unwrap().is("cleaned"));
        assert!(model.find_object("rm").unwrap().get("extra-dirty").is_none());
    }

    proptest! {
        /// Interrupted cleaning leaves positive work until the total covers it
        #[test]
        fn prop_work_split_stays_positive(
            total in 2u32..500,
            cuts in proptest::collection::vec(1u32..50, 1..8),
        ) {
            let total = Decimal::from(total);
            let mut model = room_model("dirty", total);
            let mut done = Decimal::ZERO;
            let mut start = Decimal::ZERO;

            for cut in cuts {
                let work = Decimal::from(cut);
                let action = Action::Clean(Clean::new(start, total, "agent1", "rm"));
                if !action.is_applicable(&model) {
                    break;
                }
                action.as_partial(start + work).apply(&mut model).unwrap();
                done += work;
                let room = model.find_object("rm").unwrap();
                if done < total {
                    prop_assert!(!room.is("cleaned"));
                    prop_assert_eq!(room.number("dirtiness").unwrap(), total - done);
                    prop_assert!(room.number("dirtiness").unwrap() > Decimal::ZERO);
                } else {
                    prop_assert!(room.is("cleaned"));
                }
                start += Decimal::from(100);
            }
        }
    }
}
