//! Scheduled exogenous events, plus the planning-only events agents publish

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::debug;

use crate::actions::{Action, EventAction};
use crate::core::error::Result;
use crate::core::types::Deadline;
use crate::execution::ActionState;
use crate::model::Event;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventExecutor {
    /// Scheduled events not yet fired, grouped by time
    pending: BTreeMap<Decimal, Vec<Event>>,
    executing: Option<ActionState>,
    /// Events agents expect their plans to cause, by publishing agent
    derived: BTreeMap<String, Vec<Event>>,
}

impl EventExecutor {
    pub fn new(events: Vec<Event>) -> Self {
        let mut pending: BTreeMap<Decimal, Vec<Event>> = BTreeMap::new();
        for event in events {
            pending.entry(event.time).or_default().push(event);
        }
        Self {
            pending,
            executing: None,
            derived: BTreeMap::new(),
        }
    }

    /// Pending events only keep a run bounded by `deadline` going
    pub fn has_goals(&self, deadline: Deadline) -> bool {
        if self.executing.is_some() {
            return true;
        }
        match (deadline, self.pending.keys().next()) {
            (Deadline::At(deadline), Some(first)) => *first <= deadline,
            _ => false,
        }
    }

    pub fn next_action(&self) -> Option<ActionState> {
        if let Some(executing) = &self.executing {
            return Some(executing.clone());
        }
        self.pending
            .iter()
            .next()
            .map(|(time, events)| ActionState::new(Action::Events(EventAction::new(*time, events.clone()))))
    }

    pub fn notify_action_starting(&mut self, state: &ActionState) -> Result<()> {
        self.pending.pop_first();
        self.executing = Some(state.start()?);
        Ok(())
    }

    pub fn notify_action_finishing(&mut self) {
        self.executing = None;
    }

    /// Replace the events `agent` expects its plan to cause
    pub fn publish(&mut self, agent: &str, events: Vec<Event>) {
        debug!(%agent, events = events.len(), "publishing planned events");
        self.derived.insert(agent.to_string(), events);
    }

    pub fn clear_derived(&mut self) {
        self.derived.clear();
    }

    /// Future events a planner may rely on at `time`
    ///
    /// Hidden scheduled events are left out.
    pub fn known_events(&self, time: Decimal) -> Vec<Event> {
        let scheduled = self.pending.values().flatten().filter(|e| !e.hidden);
        let mut events: Vec<Event> = scheduled
            .chain(self.derived.values().flatten())
            .filter(|e| e.time >= time)
            .cloned()
            .collect();
        events.sort();
        events
    }

    /// Scheduled events that will actually happen and planners can see
    pub fn pending_events(&self) -> Vec<Event> {
        self.pending
            .values()
            .flatten()
            .filter(|e| !e.hidden)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::accuracy::as_end_time;
    use crate::model::EventKind;

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn death(time: i64, id: &str) -> Event {
        Event::new(d(time), EventKind::Object, id).with_predicate("alive", false)
    }

    #[test]
    fn test_events_fire_grouped_by_time() {
        let mut executor = EventExecutor::new(vec![death(5, "c2"), death(3, "c1"), death(5, "c3")]);

        let first = executor.next_action().unwrap();
        assert_eq!(first.time, as_end_time(d(3)));
        executor.notify_action_starting(&first).unwrap();
        assert!(executor.next_action().unwrap().is_executing());
        executor.notify_action_finishing();

        let Action::Events(second) = executor.next_action().unwrap().action else {
            panic!("expected an event action");
        };
        assert_eq!(second.events.len(), 2);
    }

    #[test]
    fn test_events_only_drive_bounded_runs() {
        let executor = EventExecutor::new(vec![death(5, "c1")]);
        assert!(!executor.has_goals(Deadline::Never));
        assert!(!executor.has_goals(Deadline::At(d(4))));
        assert!(executor.has_goals(Deadline::At(d(5))));
        assert!(!EventExecutor::new(Vec::new()).has_goals(Deadline::At(d(5))));
    }

    #[test]
    fn test_hidden_events_are_not_known() {
        let mut executor = EventExecutor::new(vec![death(5, "c1").hidden(), death(6, "c2")]);
        executor.publish("police1", vec![Event::edge_cleared(d(2), "a", "b")]);

        let known = executor.known_events(Decimal::ZERO);
        let ids: Vec<_> = known.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a b", "c2"]);
        assert_eq!(executor.pending_events().len(), 1);

        executor.clear_derived();
        assert_eq!(executor.known_events(Decimal::ZERO).len(), 1);
    }

    #[test]
    fn test_publishing_replaces_an_agents_events() {
        let mut executor = EventExecutor::new(Vec::new());
        executor.publish("police1", vec![Event::edge_cleared(d(2), "a", "b")]);
        executor.publish("police1", vec![Event::edge_cleared(d(4), "c", "d")]);
        let known = executor.known_events(Decimal::ZERO);
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].id, "c d");
    }
}
