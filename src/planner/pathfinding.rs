//! Earliest-arrival routing over the world graph
//!
//! Blocked edges are impassable unless a known event clears them, in which
//! case the route waits at the edge until the clear time.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ahash::AHashMap;
use rust_decimal::Decimal;

use crate::model::{edge_id, Graph};

/// One edge traversal of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leg {
    pub start: String,
    pub end: String,
    pub depart: Decimal,
    pub distance: Decimal,
}

impl Leg {
    pub fn arrival(&self) -> Decimal {
        self.depart + self.distance
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub legs: Vec<Leg>,
    pub arrival: Decimal,
}

/// Node in the open set
#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteNode {
    node: String,
    arrival: Decimal,
}

impl Ord for RouteNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .arrival
            .cmp(&self.arrival)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for RouteNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Earliest time `start -> end` can be entered when arriving at `now`
fn departure(
    graph: &Graph,
    start: &str,
    end: &str,
    now: Decimal,
    clear_times: &AHashMap<String, Decimal>,
) -> Option<Decimal> {
    if graph.is_traversable(start, end) {
        return Some(now);
    }
    clear_times
        .get(&edge_id(start, end))
        .or_else(|| clear_times.get(&edge_id(end, start)))
        .map(|clear| now.max(*clear))
}

/// Find the earliest-arrival route using Dijkstra with waiting
///
/// Returns None if `goal` is unreachable. `clear_times` maps edge ids to the
/// time a blocked edge becomes passable.
pub fn find_route(
    graph: &Graph,
    start: &str,
    goal: &str,
    depart: Decimal,
    clear_times: &AHashMap<String, Decimal>,
) -> Option<Route> {
    if start == goal {
        return Some(Route {
            legs: Vec::new(),
            arrival: depart,
        });
    }

    let mut open_set = BinaryHeap::new();
    let mut came_from: AHashMap<String, Leg> = AHashMap::new();
    let mut best: AHashMap<String, Decimal> = AHashMap::new();

    best.insert(start.to_string(), depart);
    open_set.push(RouteNode {
        node: start.to_string(),
        arrival: depart,
    });

    while let Some(current) = open_set.pop() {
        if current.node == goal {
            return Some(Route {
                legs: reconstruct_path(&came_from, goal),
                arrival: current.arrival,
            });
        }
        if best.get(&current.node).is_some_and(|b| *b < current.arrival) {
            continue;
        }

        for (neighbour, edge) in graph.neighbours(&current.node) {
            let Some(distance) = edge.number("distance") else {
                continue;
            };
            let Some(leave) = departure(graph, &current.node, neighbour, current.arrival, clear_times)
            else {
                continue;
            };

            let arrival = leave + distance;
            if best.get(neighbour).map_or(true, |b| arrival < *b) {
                best.insert(neighbour.to_string(), arrival);
                came_from.insert(
                    neighbour.to_string(),
                    Leg {
                        start: current.node.clone(),
                        end: neighbour.to_string(),
                        depart: leave,
                        distance,
                    },
                );
                open_set.push(RouteNode {
                    node: neighbour.to_string(),
                    arrival,
                });
            }
        }
    }

    None
}

/// Pick the reachable target with the earliest arrival; ties go to the first listed
pub fn nearest<'a>(
    graph: &Graph,
    start: &str,
    targets: impl IntoIterator<Item = &'a str>,
    depart: Decimal,
    clear_times: &AHashMap<String, Decimal>,
) -> Option<(&'a str, Route)> {
    let mut found: Option<(&'a str, Route)> = None;
    for target in targets {
        let Some(route) = find_route(graph, start, target, depart, clear_times) else {
            continue;
        };
        if found.as_ref().map_or(true, |(_, r)| route.arrival < r.arrival) {
            found = Some((target, route));
        }
    }
    found
}

/// Reconstruct legs from came_from map
fn reconstruct_path(came_from: &AHashMap<String, Leg>, goal: &str) -> Vec<Leg> {
    let mut legs = Vec::new();
    let mut current = goal;
    while let Some(leg) = came_from.get(current) {
        legs.push(leg.clone());
        current = &leg.start;
    }
    legs.reverse();
    legs
}
