//! Integration tests for roborescue runs
//!
//! A small city with one blocked road between the hospital side and a buried
//! civilian. The police officer has to clear the road before the medic can
//! dig the civilian out and carry them to the hospital.

use std::sync::Arc;

use plan_sim::actions::Action;
use plan_sim::core::config::{CoordinatorKind, SimulationConfig, StallPolicy};
use plan_sim::core::Deadline;
use plan_sim::domain;
use plan_sim::model::{Event, EventKind, Fact, Graph, Model, WorldObject};
use plan_sim::planner::HeuristicPlanner;
use plan_sim::simulation::Simulator;
use rust_decimal::Decimal;

fn d(n: i64) -> Decimal {
    Decimal::from(n)
}

/// h1 -2- b1 -3- b2, with b1-b2 blocked; c1 buried at b2
fn city() -> Model {
    let mut model = Model::new("roborescue")
        .with_object("hospital", "h1", WorldObject::new())
        .with_object("building", "b1", WorldObject::new())
        .with_object("building", "b2", WorldObject::new())
        .with_object(
            "medic",
            "medic1",
            WorldObject::new()
                .with_fact("at", Fact::located("h1"))
                .with_fact("empty", true),
        )
        .with_object(
            "police",
            "police1",
            WorldObject::new().with_fact("at", Fact::located("b1")),
        )
        .with_object(
            "civilian",
            "c1",
            WorldObject::new()
                .with_fact("at", Fact::located("b2"))
                .with_fact("alive", true)
                .with_fact("buried", true)
                .with_fact("buriedness", d(4)),
        )
        .with_goal(&["rescued", "c1"]);
    let mut graph = Graph::new()
        .with_edge("h1", "b1", d(2))
        .with_edge("b1", "b2", d(3));
    graph.bidirectional = true;
    if let Some(edge) = graph.edge_mut("b1", "b2") {
        edge.set("edge", false);
        edge.set("blocked-edge", true);
        edge.set("blockedness", d(5));
    }
    model.graph = graph;
    model
}

fn simulator(model: Model, coordinator: CoordinatorKind) -> Simulator {
    let domain = domain::for_name("roborescue").unwrap();
    let config = SimulationConfig {
        coordinator,
        stall_policy: StallPolicy::Defer,
        ..SimulationConfig::default()
    };
    let planner = Arc::new(HeuristicPlanner::new(
        domain.clone(),
        config.heuristic_planning_time,
    ));
    Simulator::new(model, domain, planner, config).unwrap()
}

fn position(actions: &[Action], pred: impl Fn(&Action) -> bool) -> usize {
    actions.iter().position(pred).unwrap()
}

// ============================================================================
// Rescue Workflow
// ============================================================================

/// Market coordination: the police bid covers the medic's road requirement
///
/// The medic wins the rescue only by requiring the blocked road, the police
/// officer wins the road, and the medic plans around the published clearing.
#[test]
fn test_market_rescue_clears_road_first() {
    let mut sim = simulator(city(), CoordinatorKind::Market);
    let achievement = sim.run(Deadline::Never).unwrap().unwrap();

    assert!(achievement.is_complete());
    let executed = sim.executed();
    let unblock = position(executed, |a| matches!(a, Action::Unblock(_)));
    let rescue = position(executed, |a| matches!(a, Action::Rescue(_)));
    let unload = position(executed, |a| matches!(a, Action::Unload(_)));
    assert!(unblock < rescue);
    assert!(rescue < unload);
    assert!(executed[unblock].end_time() < executed[rescue].start_time());

    let c1 = sim.model().find_object("c1").unwrap();
    assert!(c1.is("rescued"));
    assert!(sim.model().graph.is_traversable("b1", "b2"));
    assert!(sim.stalls().is_empty());
}

/// Central coordination: one joint plan unblocks then rescues
#[test]
fn test_central_rescue_clears_road_first() {
    let mut sim = simulator(city(), CoordinatorKind::Central);
    let achievement = sim.run(Deadline::Never).unwrap().unwrap();

    assert!(achievement.is_complete());
    let executed = sim.executed();
    assert!(matches!(executed.first(), Some(Action::Plan(_))));
    let unblock = position(executed, |a| matches!(a, Action::Unblock(_)));
    let rescue = position(executed, |a| matches!(a, Action::Rescue(_)));
    assert!(unblock < rescue);
    assert!(sim.report().is_success());
}

// ============================================================================
// Exogenous Events
// ============================================================================

/// A hidden death ends the rescue attempt without a rescue
#[test]
fn test_hidden_death_leaves_goal_unmet() {
    let mut model = city();
    model.events = vec![Event::new(d(3), EventKind::Object, "c1")
        .with_predicate("alive", false)
        .hidden()];

    let mut sim = simulator(model, CoordinatorKind::Market);
    let achievement = sim.run(Deadline::At(d(100))).unwrap().unwrap();

    assert!(!achievement.is_complete());
    assert!(!sim.executed().iter().any(|a| matches!(a, Action::Rescue(_))));
    let c1 = sim.model().find_object("c1").unwrap();
    assert_eq!(c1.get("alive"), Some(&Fact::Bool(false)));
}

/// Visible events fire at their time even with nothing else to do
#[test]
fn test_events_fire_within_bounded_run() {
    let mut model = city();
    model.goals.clear();
    model.events = vec![Event::new(d(5), EventKind::Object, "c1").with_predicate("buried", false)];

    let mut sim = simulator(model, CoordinatorKind::Market);
    sim.run(Deadline::At(d(10))).unwrap().unwrap();

    assert!(!sim.model().find_object("c1").unwrap().is("buried"));
    assert!(sim.executed().iter().any(|a| matches!(a, Action::Events(_))));
}
