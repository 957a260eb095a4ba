//! Roborescue domain: police clear roads, medics bring civilians to hospital
//!
//! Medics price rescues as if every road were open. Each blocked road on the
//! resulting route becomes an `(edge a b)` requirement that only police bid
//! on. A police plan publishes the times its roads clear, and medics plan
//! their routes to wait for those times.

use ahash::AHashMap;
use rust_decimal::Decimal;
use tracing::debug;

use super::{clear_times, BidRequest, DomainContext, DEFAULT_TASK_VALUE};
use crate::actions::{
    Action, ActionCatalog, ActionType, Load, Move, Rescue, Unblock, Unload,
};
use crate::allocation::{Bid, Goal, Task, TaskKey};
use crate::core::accuracy::as_start_time;
use crate::core::error::{Result, SimError};
use crate::core::types::Deadline;
use crate::model::{edge_id, Event, EventKind, Fact, Model};
use crate::planner::pathfinding::{nearest, Route};
use crate::planner::{find_route, PlanRequest};

pub const POLICE: &str = "police";
pub const MEDIC: &str = "medic";
pub const CIVILIAN: &str = "civilian";
pub const AGENT_KINDS: &[&str] = &[POLICE, MEDIC];
pub const NODE_KINDS: &[&str] = &["building", "hospital", "node"];

const RESCUED: &str = "rescued";
const EDGE: &str = "edge";

pub const LOAD_DURATION: Decimal = Decimal::ONE;
pub const UNLOAD_DURATION: Decimal = Decimal::ONE;

#[derive(Debug, Clone)]
pub struct Roborescue {
    catalog: ActionCatalog,
}

impl Roborescue {
    pub fn new() -> Self {
        Self {
            catalog: ActionCatalog::new(&[
                ActionType::Move,
                ActionType::Observe,
                ActionType::Unblock,
                ActionType::Rescue,
                ActionType::Load,
                ActionType::Unload,
            ]),
        }
    }
}

impl Default for Roborescue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Cursor {
    agent: String,
    node: String,
    free: Decimal,
}

fn cursors(model: &Model, agents: &[String]) -> Result<Vec<Cursor>> {
    agents
        .iter()
        .map(|agent| {
            let node = model
                .location_of(agent)
                .ok_or_else(|| SimError::UnknownObject(agent.clone()))?;
            Ok(Cursor {
                agent: agent.clone(),
                node: node.to_string(),
                free: Decimal::ZERO,
            })
        })
        .collect()
}

fn push_moves(plan: &mut Vec<Action>, agent: &str, route: &Route) {
    for leg in &route.legs {
        plan.push(Action::Move(Move::new(
            leg.depart,
            leg.distance,
            agent,
            &leg.start,
            &leg.end,
        )));
    }
}

/// Edge goal in the orientation the graph stores it
fn edge_goal(model: &Model, start: &str, end: &str) -> Vec<String> {
    let (a, b) = if model.graph.edges.contains_key(&edge_id(start, end)) {
        (start, end)
    } else {
        (end, start)
    };
    vec![EDGE.to_string(), a.to_string(), b.to_string()]
}

/// Copy of the model with every road open
fn without_blockages(model: &Model) -> Model {
    let mut open = model.clone();
    for edge in open.graph.edges.values_mut() {
        edge.set(EDGE, true);
        edge.set("blocked-edge", false);
        edge.remove("blockedness");
    }
    open
}

/// Earliest known time a civilian dies, if planners can see it coming
fn death_deadline(model: &Model, civilian: &str) -> Deadline {
    model
        .events
        .iter()
        .filter(|e| !e.hidden && e.kind == EventKind::Object && e.id == civilian)
        .filter(|e| e.sets("alive", &Fact::Bool(false)))
        .map(|e| e.time)
        .min()
        .map(Deadline::At)
        .unwrap_or(Deadline::Never)
}

/// Police tour unblocking `edges`, nearest job first
///
/// Returns the plan and the clear times it adds, or `None` if some edge cannot
/// be reached.
fn police_tour(
    model: &Model,
    cursors: &mut [Cursor],
    edges: &[(String, String)],
    clear: &mut AHashMap<String, Decimal>,
) -> Result<Option<Vec<Action>>> {
    let mut jobs = Vec::new();
    for (start, end) in edges {
        let edge = model
            .graph
            .edge(start, end)
            .ok_or_else(|| SimError::UnknownEdge(edge_id(start, end)))?;
        if edge.is(EDGE) {
            continue;
        }
        let blockedness = edge
            .number("blockedness")
            .or_else(|| edge.number("distance"))
            .unwrap_or(Decimal::ONE);
        jobs.push((start.clone(), end.clone(), blockedness));
    }

    let mut plan = Vec::new();
    while !jobs.is_empty() {
        let mut best: Option<(Decimal, usize, usize, Route)> = None;
        for (j, (start, end, blockedness)) in jobs.iter().enumerate() {
            for (i, cursor) in cursors.iter().enumerate() {
                let Some((_, route)) = nearest(
                    &model.graph,
                    &cursor.node,
                    [start.as_str(), end.as_str()],
                    cursor.free,
                    clear,
                ) else {
                    continue;
                };
                let finish = route.arrival + blockedness;
                if best.as_ref().map_or(true, |(f, _, _, _)| finish < *f) {
                    best = Some((finish, j, i, route));
                }
            }
        }
        let Some((finish, j, i, route)) = best else {
            debug!(edges = jobs.len(), "blocked roads unreachable");
            return Ok(None);
        };
        let (start, end, blockedness) = jobs.remove(j);
        let cursor = &mut cursors[i];
        push_moves(&mut plan, &cursor.agent, &route);
        plan.push(Action::Unblock(Unblock::new(
            route.arrival,
            blockedness,
            &cursor.agent,
            &start,
            &end,
        )));
        let cleared = as_start_time(finish);
        clear.insert(edge_id(&start, &end), cleared);
        clear.insert(edge_id(&end, &start), cleared);
        if let Some(leg) = route.legs.last() {
            cursor.node = leg.end.clone();
        }
        cursor.free = cleared;
    }
    Ok(Some(plan))
}

/// Deliver a civilian the medic already carries to the nearest hospital
fn deliver(
    model: &Model,
    cursor: &mut Cursor,
    civilian: &str,
    hospitals: &[String],
    clear: &AHashMap<String, Decimal>,
    plan: &mut Vec<Action>,
) -> Option<Decimal> {
    let (hospital, route) = nearest(
        &model.graph,
        &cursor.node,
        hospitals.iter().map(String::as_str),
        cursor.free,
        clear,
    )?;
    push_moves(plan, &cursor.agent, &route);
    plan.push(Action::Unload(Unload::new(
        route.arrival,
        UNLOAD_DURATION,
        &cursor.agent,
        civilian,
        hospital,
    )));
    cursor.node = hospital.to_string();
    cursor.free = route.arrival + UNLOAD_DURATION;
    Some(cursor.free)
}

/// Medic tours rescuing `civilians`, earliest delivery first
fn medic_tour(
    model: &Model,
    cursors: &mut [Cursor],
    civilians: &[String],
    clear: &AHashMap<String, Decimal>,
) -> Result<Option<Vec<Action>>> {
    let hospitals = model.ids_of(&["hospital"]);
    let mut plan = Vec::new();

    // Finish deliveries already under way
    for cursor in cursors.iter_mut() {
        let carried = model
            .find_object(&cursor.agent)
            .and_then(|m| m.get("carrying"))
            .and_then(Fact::located_at)
            .map(str::to_string);
        if let Some(civilian) = carried {
            if deliver(model, cursor, &civilian, &hospitals, clear, &mut plan).is_none() {
                return Ok(None);
            }
        }
    }

    let mut pending = Vec::new();
    for id in civilians {
        let civilian = model.object(id)?;
        if civilian.is(RESCUED) || cursors.iter().any(|c| civilian.location() == Some(c.agent.as_str())) {
            continue;
        }
        if civilian.get("alive") == Some(&Fact::Bool(false)) {
            debug!(civilian = %id, "civilian is dead");
            return Ok(None);
        }
        let node = civilian
            .location()
            .ok_or_else(|| SimError::InvalidModel(format!("civilian {} has no location", id)))?;
        let dig = if civilian.is("buried") {
            civilian.number("buriedness").unwrap_or_default()
        } else {
            Decimal::ZERO
        };
        pending.push((id.clone(), node.to_string(), dig));
    }

    while !pending.is_empty() {
        // (delivered, civilian, medic, trip, medic after the trip)
        let mut best: Option<(Decimal, usize, usize, Vec<Action>, Cursor)> = None;
        for (j, (civilian, node, dig)) in pending.iter().enumerate() {
            for (i, cursor) in cursors.iter().enumerate() {
                let Some(route) = find_route(&model.graph, &cursor.node, node, cursor.free, clear)
                else {
                    continue;
                };
                let mut trip = Vec::new();
                push_moves(&mut trip, &cursor.agent, &route);
                let mut at = route.arrival;
                if *dig > Decimal::ZERO {
                    trip.push(Action::Rescue(Rescue::new(at, *dig, &cursor.agent, civilian, node)));
                    at += *dig;
                }
                trip.push(Action::Load(Load::new(at, LOAD_DURATION, &cursor.agent, civilian, node)));
                let mut moved = Cursor {
                    agent: cursor.agent.clone(),
                    node: node.clone(),
                    free: at + LOAD_DURATION,
                };
                let Some(delivered) = deliver(model, &mut moved, civilian, &hospitals, clear, &mut trip)
                else {
                    continue;
                };
                if best.as_ref().map_or(true, |(d, _, _, _, _)| delivered < *d) {
                    best = Some((delivered, j, i, trip, moved));
                }
            }
        }
        let Some((_, j, i, trip, moved)) = best else {
            debug!(civilians = pending.len(), "civilians unreachable");
            return Ok(None);
        };
        pending.remove(j);
        plan.extend(trip);
        cursors[i] = moved;
    }
    Ok(Some(plan))
}

fn sorted(mut plan: Vec<Action>) -> Vec<Action> {
    plan.sort_by(|a, b| a.start_time().cmp(&b.start_time()).then(a.ordinal().cmp(&b.ordinal())));
    plan
}

/// Blocked edges a plan's moves cross, in first-use order
fn blocked_moves<'a>(model: &Model, plan: &'a [Action]) -> Vec<&'a Move> {
    plan.iter()
        .filter_map(|a| match a {
            Action::Move(m) if !model.graph.is_traversable(&m.start_node, &m.end_node) => Some(m),
            _ => None,
        })
        .collect()
}

impl DomainContext for Roborescue {
    fn name(&self) -> &'static str {
        "roborescue"
    }

    fn node_kinds(&self) -> &'static [&'static str] {
        NODE_KINDS
    }

    fn agent_kinds(&self) -> &'static [&'static str] {
        AGENT_KINDS
    }

    fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    fn compute_tasks(&self, model: &Model, time: Decimal) -> Vec<Task> {
        let mut tasks = Vec::new();
        for predicate in model.unmet_goals() {
            if predicate.first().map(String::as_str) != Some(RESCUED) {
                continue;
            }
            let Some(civilian) = predicate.get(1) else {
                continue;
            };
            if model.find_object(civilian).and_then(|c| c.get("alive")) == Some(&Fact::Bool(false)) {
                continue;
            }
            let deadline = death_deadline(model, civilian);
            if deadline.has_elapsed(time) {
                continue;
            }
            tasks.push(Task::new(Goal::new(predicate, deadline), DEFAULT_TASK_VALUE));
        }
        tasks
    }

    fn task_key(&self, task: &Task) -> TaskKey {
        let category = if task.goal.name() == EDGE { 0 } else { 1 };
        TaskKey::new(category, &task.goal)
    }

    fn generate_bid(&self, request: &BidRequest, task: &Task) -> Result<Option<Bid>> {
        let kind = request.model.object_kind(request.agent);
        let goals = request.goals_with(task);
        let model = self.transform_model_for_planning(request.model, request.agent, &goals);

        match (kind, task.goal.name()) {
            (Some(POLICE), EDGE) => {
                let outcome = request.plan(&model, &goals)?;
                Ok(outcome
                    .plan
                    .map(|plan| request.bid(task, &plan, outcome.time_taken, Vec::new())))
            }
            (Some(MEDIC), RESCUED) => {
                let outcome = request.plan(&without_blockages(&model), &goals)?;
                let Some(plan) = outcome.plan else {
                    return Ok(None);
                };
                // Each blocked road, with the relative time the medic first needs it
                let mut needed: Vec<(Vec<String>, Decimal)> = Vec::new();
                for step in blocked_moves(&model, &plan) {
                    let predicate = edge_goal(&model, &step.start_node, &step.end_node);
                    if !needed.iter().any(|(p, _)| *p == predicate) {
                        needed.push((predicate, step.timing.start_time()));
                    }
                }
                let plan_end = request.plan_end(&plan);
                let share = Decimal::from(needed.len().max(1) as u64);
                let requirements = needed
                    .into_iter()
                    .map(|(predicate, start)| {
                        let at = request.time + start;
                        let deadline = match task.goal.deadline {
                            Deadline::At(due) => Deadline::At(at + (due - plan_end)),
                            Deadline::Never => Deadline::At(at),
                        };
                        Task::new(Goal::new(predicate, deadline), task.value / share)
                    })
                    .collect();
                Ok(Some(request.bid(task, &plan, outcome.time_taken, requirements)))
            }
            _ => Ok(None),
        }
    }

    /// Only this agent, the locations, and the civilians named in `goals`
    fn transform_model_for_planning(&self, model: &Model, agent: &str, goals: &[Goal]) -> Model {
        let mut planning = model.clone();
        let kind = model.object_kind(agent).unwrap_or_default().to_string();
        let wanted: Vec<&str> = goals
            .iter()
            .filter(|g| g.name() == RESCUED)
            .filter_map(Goal::subject)
            .collect();

        planning.objects.retain(|k, _| {
            NODE_KINDS.contains(&k.as_str()) || *k == kind || (kind == MEDIC && k == CIVILIAN)
        });
        for (k, objects) in planning.objects.iter_mut() {
            if *k == kind {
                objects.retain(|id, _| id == agent);
            } else if k == CIVILIAN {
                objects.retain(|id, civilian| {
                    wanted.contains(&id.as_str()) || civilian.location() == Some(agent)
                });
            }
        }
        planning
    }

    fn extract_events(&self, plan: &[Action], _goals: &[Goal]) -> Vec<Event> {
        plan.iter()
            .filter_map(|a| match a {
                Action::Unblock(u) => Some(u),
                _ => None,
            })
            .flat_map(|u| {
                let at = as_start_time(u.timing.end_time());
                [
                    Event::edge_cleared(at, &u.start_node, &u.end_node),
                    Event::edge_cleared(at, &u.end_node, &u.start_node),
                ]
            })
            .collect()
    }

    fn heuristic_plan(&self, request: &PlanRequest) -> Result<Option<Vec<Action>>> {
        let model = request.model;
        let mut clear = clear_times(request.events, request.origin);
        let agents = match request.agent {
            Some(agent) => vec![agent.to_string()],
            None => self.agents(model),
        };
        let of_kind = |kind: &str| -> Vec<String> {
            agents
                .iter()
                .filter(|a| model.object_kind(a) == Some(kind))
                .cloned()
                .collect()
        };
        let police = of_kind(POLICE);
        let medics = of_kind(MEDIC);

        let mut edges: Vec<(String, String)> = Vec::new();
        let mut civilians: Vec<String> = Vec::new();
        for goal in request.goals {
            match (goal.name(), goal.predicate.get(1), goal.predicate.get(2)) {
                (EDGE, Some(a), Some(b)) => edges.push((a.clone(), b.clone())),
                (RESCUED, Some(c), _) => civilians.push(c.clone()),
                (other, _, _) => {
                    return Err(SimError::InvalidModel(format!(
                        "roborescue cannot achieve goal {}",
                        other
                    )))
                }
            }
        }
        if (!edges.is_empty() && police.is_empty()) || (!civilians.is_empty() && medics.is_empty()) {
            return Ok(None);
        }

        // Planning for everyone: clear whatever blocks the medics' ideal routes
        if request.agent.is_none() && !civilians.is_empty() {
            let open = without_blockages(model);
            let mut scouts = cursors(model, &medics)?;
            if let Some(ideal) = medic_tour(&open, &mut scouts, &civilians, &AHashMap::new())? {
                for step in blocked_moves(model, &ideal) {
                    let goal = edge_goal(model, &step.start_node, &step.end_node);
                    let edge = (goal[1].clone(), goal[2].clone());
                    if !edges.contains(&edge) {
                        edges.push(edge);
                    }
                }
            }
        }

        let mut plan = Vec::new();
        if !edges.is_empty() {
            let mut units = cursors(model, &police)?;
            match police_tour(model, &mut units, &edges, &mut clear)? {
                Some(tour) => plan.extend(tour),
                None => return Ok(None),
            }
        }
        if !civilians.is_empty() {
            let mut units = cursors(model, &medics)?;
            match medic_tour(model, &mut units, &civilians, &clear)? {
                Some(tour) => plan.extend(tour),
                None => return Ok(None),
            }
        }
        Ok(Some(sorted(plan)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Graph, WorldObject};
    use crate::planner::HeuristicPlanner;
    use std::sync::Arc;

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

    fn request<'a>(model: &'a Model, agent: Option<&'a str>, goals: &'a [Goal], events: &'a [Event]) -> PlanRequest<'a> {
        PlanRequest {
            model,
            agent,
            goals,
            metric: None,
            planning_time: d(10),
            origin: Decimal::ZERO,
            events,
        }
    }

    fn rescue_goal() -> Vec<Goal> {
        vec![Goal::new(vec!["rescued".into(), "c1".into()], Deadline::Never)]
    }

    #[test]
    fn test_death_event_sets_deadline() {
        let mut model = city();
        model.events.push(
            Event::new(d(40), EventKind::Object, "c1").with_predicate("alive", false),
        );
        let tasks = Roborescue::new().compute_tasks(&model, Decimal::ZERO);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].goal.deadline, Deadline::At(d(40)));

        assert!(Roborescue::new().compute_tasks(&model, d(41)).is_empty());
    }

    #[test]
    fn test_hidden_death_is_not_a_deadline() {
        let mut model = city();
        model.events.push(
            Event::new(d(40), EventKind::Object, "c1")
                .with_predicate("alive", false)
                .hidden(),
        );
        let tasks = Roborescue::new().compute_tasks(&model, Decimal::ZERO);
        assert_eq!(tasks[0].goal.deadline, Deadline::Never);
    }

    #[test]
    fn test_medic_waits_for_known_clear_event() {
        let model = city();
        let goals = rescue_goal();
        let events = vec![Event::edge_cleared(d(10), "b1", "b2")];

        let plan = Roborescue::new()
            .heuristic_plan(&request(&model, Some("medic1"), &goals, &events))
            .unwrap()
            .unwrap();

        let names: Vec<_> = plan.iter().map(|a| a.type_name()).collect();
        assert_eq!(
            names,
            vec!["Move", "Move", "Rescue", "Load", "Move", "Move", "Unload"]
        );
        // Arrives at b1 at 2 but the road opens at 10
        assert_eq!(plan[1].start_time(), d(10));
        assert_eq!(plan[2].start_time(), d(13));
    }

    #[test]
    fn test_medic_without_clear_event_has_no_plan() {
        let model = city();
        let goals = rescue_goal();
        let plan = Roborescue::new()
            .heuristic_plan(&request(&model, Some("medic1"), &goals, &[]))
            .unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_joint_plan_unblocks_then_rescues() {
        let model = city();
        let goals = rescue_goal();
        let plan = Roborescue::new()
            .heuristic_plan(&request(&model, None, &goals, &[]))
            .unwrap()
            .unwrap();

        let unblock = plan.iter().find(|a| a.type_name() == "Unblock").unwrap();
        assert_eq!(unblock.start_time(), Decimal::ZERO);
        assert_eq!(unblock.duration(), d(5));
        let crossing = plan
            .iter()
            .find(|a| matches!(a, Action::Move(m) if m.start_node == "b1" && m.end_node == "b2"))
            .unwrap();
        assert_eq!(crossing.start_time(), d(5));
    }

    #[test]
    fn test_medic_bid_requires_blocked_road() {
        let model = city();
        let planner = HeuristicPlanner::new(Arc::new(Roborescue::new()), Decimal::ONE);
        let task = Task::new(rescue_goal().remove(0), d(1));
        let request = BidRequest {
            model: &model,
            agent: "medic1",
            won_bids: &[],
            planner: &planner,
            time: d(20),
            planning_time: d(10),
            events: &[],
        };

        let bid = Roborescue::new().generate_bid(&request, &task).unwrap().unwrap();

        assert_eq!(bid.requirements.len(), 1);
        let requirement = &bid.requirements[0];
        assert_eq!(requirement.goal.predicate, vec!["edge", "b1", "b2"]);
        // The crossing starts 2 after the plan origin
        assert_eq!(requirement.goal.deadline, Deadline::At(d(22)));
        assert_eq!(requirement.value, d(1));
    }

    #[test]
    fn test_police_decline_rescues_and_medics_decline_roads() {
        let model = city();
        let planner = HeuristicPlanner::new(Arc::new(Roborescue::new()), Decimal::ONE);
        let bid_for = |agent: &str, task: &Task| {
            let request = BidRequest {
                model: &model,
                agent,
                won_bids: &[],
                planner: &planner,
                time: Decimal::ZERO,
                planning_time: d(10),
                events: &[],
            };
            Roborescue::new().generate_bid(&request, task).unwrap()
        };
        let rescue = Task::new(rescue_goal().remove(0), d(1));
        let road = Task::new(
            Goal::new(vec!["edge".into(), "b1".into(), "b2".into()], Deadline::Never),
            d(1),
        );

        assert!(bid_for("police1", &rescue).is_none());
        assert!(bid_for("medic1", &road).is_none());
        let bid = bid_for("police1", &road).unwrap();
        assert_eq!(bid.estimated_endtime, d(5));
    }

    #[test]
    fn test_police_publish_clear_events_both_ways() {
        let plan = vec![Action::Unblock(Unblock::new(d(3), d(5), "police1", "b1", "b2"))];
        let events = Roborescue::new().extract_events(&plan, &[]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time, d(8));
        assert_eq!(events[0].id, "b1 b2");
        assert_eq!(events[1].id, "b2 b1");
    }

    #[test]
    fn test_transform_keeps_own_agent_and_wanted_civilians() {
        let mut model = city();
        model.insert_object("medic", "medic2", WorldObject::new().with_fact("at", Fact::located("h1")));
        model.insert_object("civilian", "c2", WorldObject::new().with_fact("at", Fact::located("b1")));

        let planning =
            Roborescue::new().transform_model_for_planning(&model, "medic1", &rescue_goal());

        assert!(planning.find_object("medic1").is_some());
        assert!(planning.find_object("medic2").is_none());
        assert!(planning.find_object("police1").is_none());
        assert!(planning.find_object("c1").is_some());
        assert!(planning.find_object("c2").is_none());
        assert!(planning.find_object("h1").is_some());
    }
}
