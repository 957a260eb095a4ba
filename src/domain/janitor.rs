//! Janitor domain: agents cleaning rooms on a graph
//!
//! Extra-dirty rooms need two agents. In the market the winner of such a
//! room works at half rate and asks for an `(assisted room)` task, which a
//! second agent wins and serves with its own half-rate share of the work.

use ahash::AHashMap;
use rust_decimal::Decimal;
use tracing::debug;

use super::{BidRequest, DomainContext, DEFAULT_TASK_VALUE};
use crate::actions::{
    Action, ActionCatalog, ActionType, Clean, ExtraClean, ExtraCleanPart, Move,
};
use crate::allocation::{Bid, Goal, Task, TaskKey};
use crate::core::error::{Result, SimError};
use crate::core::types::Deadline;
use crate::model::{Event, Model};
use crate::planner::pathfinding::Route;
use crate::planner::{find_route, PlanRequest};

pub const AGENT_KINDS: &[&str] = &["agent"];
pub const NODE_KINDS: &[&str] = &["room", "node"];

const CLEANED: &str = "cleaned";
const ASSISTED: &str = "assisted";

#[derive(Debug, Clone)]
pub struct Janitor {
    catalog: ActionCatalog,
}

impl Janitor {
    pub fn new() -> Self {
        Self {
            catalog: ActionCatalog::new(&[
                ActionType::Move,
                ActionType::Observe,
                ActionType::Clean,
                ActionType::ExtraClean,
                ActionType::ExtraCleanPart,
            ]),
        }
    }
}

impl Default for Janitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Work a goal asks for at one room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Work {
    Clean,
    ExtraClean,
    Assist,
}

#[derive(Debug, Clone)]
struct Job {
    room: String,
    work: Work,
    dirtiness: Decimal,
}

/// Where an agent will be and when it is free, while a plan is built
#[derive(Debug, Clone)]
struct Cursor {
    agent: String,
    node: String,
    free: Decimal,
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

fn jobs(model: &Model, goals: &[Goal]) -> Result<Option<Vec<Job>>> {
    let mut jobs = Vec::new();
    for goal in goals {
        let Some(room_id) = goal.subject() else {
            continue;
        };
        let room = model.object(room_id)?;
        let work = match goal.name() {
            CLEANED if room.is(CLEANED) => continue,
            CLEANED if room.is("extra-dirty") => Work::ExtraClean,
            CLEANED if room.is("dirty") => Work::Clean,
            // Neither dirty nor cleaned: nothing an agent can do
            CLEANED => return Ok(None),
            ASSISTED if room.is("extra-dirty") => Work::Assist,
            ASSISTED => continue,
            other => {
                return Err(SimError::InvalidModel(format!(
                    "janitor cannot achieve goal {}",
                    other
                )))
            }
        };
        let dirtiness = room.number("dirtiness").ok_or_else(|| {
            SimError::InvalidModel(format!("room {} has no dirtiness", room_id))
        })?;
        jobs.push(Job {
            room: room_id.to_string(),
            work,
            dirtiness,
        });
    }
    Ok(Some(jobs))
}

impl DomainContext for Janitor {
    fn name(&self) -> &'static str {
        "janitor"
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

    fn compute_tasks(&self, model: &Model, _time: Decimal) -> Vec<Task> {
        model
            .unmet_goals()
            .into_iter()
            .filter(|goal| goal.first().map(String::as_str) == Some(CLEANED))
            .map(|predicate| Task::new(Goal::new(predicate, Deadline::Never), DEFAULT_TASK_VALUE))
            .collect()
    }

    fn task_key(&self, task: &Task) -> TaskKey {
        TaskKey::new(0, &task.goal)
    }

    fn generate_bid(&self, request: &BidRequest, task: &Task) -> Result<Option<Bid>> {
        if !matches!(task.goal.name(), CLEANED | ASSISTED) {
            return Ok(None);
        }
        // The agent that won a room cannot also be its assistant
        let cleans_room = request.won_bids.iter().any(|bid| {
            bid.task.goal.name() == CLEANED && bid.task.goal.subject() == task.goal.subject()
        });
        if task.goal.name() == ASSISTED && cleans_room {
            debug!(agent = request.agent, goal = %task.goal, "own room, declining assistance");
            return Ok(None);
        }
        let goals = request.goals_with(task);
        let model = self.transform_model_for_planning(request.model, request.agent, &goals);
        let outcome = request.plan(&model, &goals)?;
        let Some(plan) = outcome.plan else {
            debug!(agent = request.agent, goal = %task.goal, "no plan, declining");
            return Ok(None);
        };

        let needs_help = task.goal.name() == CLEANED
            && self.agents(&model).len() > 1
            && task
                .goal
                .subject()
                .and_then(|room| model.find_object(room))
                .is_some_and(|room| room.is("extra-dirty"));
        let requirements = match (needs_help, task.goal.subject()) {
            (true, Some(room)) => vec![Task::new(
                Goal::new(vec![ASSISTED.to_string(), room.to_string()], task.goal.deadline),
                task.value / Decimal::TWO,
            )],
            _ => Vec::new(),
        };

        Ok(Some(request.bid(task, &plan, outcome.time_taken, requirements)))
    }

    fn transform_model_for_planning(&self, model: &Model, _agent: &str, _goals: &[Goal]) -> Model {
        model.clone()
    }

    fn extract_events(&self, _plan: &[Action], _goals: &[Goal]) -> Vec<Event> {
        Vec::new()
    }

    /// Nearest-job-first tour
    ///
    /// Repeatedly commits the (agent, job) pair that finishes earliest. When
    /// planning for everyone, extra-dirty rooms get a joint `ExtraClean` by the
    /// two agents that can get there first.
    fn heuristic_plan(&self, request: &PlanRequest) -> Result<Option<Vec<Action>>> {
        let model = request.model;
        let Some(mut jobs) = jobs(model, request.goals)? else {
            return Ok(None);
        };
        let all_agents = self.agents(model);
        let planned: Vec<String> = match request.agent {
            Some(agent) => vec![agent.to_string()],
            None => all_agents.clone(),
        };
        let mut cursors = Vec::new();
        for agent in planned {
            let node = model
                .location_of(&agent)
                .ok_or_else(|| SimError::UnknownObject(agent.clone()))?
                .to_string();
            cursors.push(Cursor {
                agent,
                node,
                free: Decimal::ZERO,
            });
        }
        let joint = request.agent.is_none() && cursors.len() > 1;
        // Only a local plan can count on an assisting agent
        let shared = !joint && all_agents.len() > 1;
        let no_events = AHashMap::new();
        let mut plan = Vec::new();

        while !jobs.is_empty() {
            // (finish, job index, routes by cursor index)
            let mut best: Option<(Decimal, usize, Vec<(usize, Route)>)> = None;

            for (j, job) in jobs.iter().enumerate() {
                let mut routes: Vec<(usize, Route)> = cursors
                    .iter()
                    .enumerate()
                    .filter_map(|(i, c)| {
                        find_route(&model.graph, &c.node, &job.room, c.free, &no_events)
                            .map(|r| (i, r))
                    })
                    .collect();
                routes.sort_by(|a, b| a.1.arrival.cmp(&b.1.arrival).then(a.0.cmp(&b.0)));

                let candidate = match (job.work, joint) {
                    (Work::ExtraClean, true) if routes.len() >= 2 => {
                        routes.truncate(2);
                        Some((routes[1].1.arrival + job.dirtiness, routes))
                    }
                    _ => routes
                        .into_iter()
                        .next()
                        .map(|(i, r)| (r.arrival + self.work_time(job, shared), vec![(i, r)])),
                };
                if let Some((finish, routes)) = candidate {
                    if best.as_ref().map_or(true, |(f, _, _)| finish < *f) {
                        best = Some((finish, j, routes));
                    }
                }
            }

            let Some((finish, j, routes)) = best else {
                debug!(agent = ?request.agent, jobs = jobs.len(), "rooms unreachable");
                return Ok(None);
            };
            let job = jobs.remove(j);
            let start = routes
                .iter()
                .map(|(_, r)| r.arrival)
                .max()
                .unwrap_or(Decimal::ZERO);
            let duration = finish - start;

            for (i, route) in &routes {
                push_moves(&mut plan, &cursors[*i].agent, route);
            }
            let first = &cursors[routes[0].0].agent;
            plan.push(match (&job.work, routes.get(1)) {
                (Work::ExtraClean, Some((second, _))) => Action::ExtraClean(ExtraClean::new(
                    start,
                    duration,
                    first,
                    &cursors[*second].agent,
                    &job.room,
                )),
                (Work::Clean, _) => Action::Clean(Clean::new(start, duration, first, &job.room)),
                _ => Action::ExtraCleanPart(ExtraCleanPart::new(start, duration, first, &job.room)),
            });
            for (i, _) in &routes {
                cursors[*i].node = job.room.clone();
                cursors[*i].free = finish;
            }
        }

        plan.sort_by(|a, b| a.start_time().cmp(&b.start_time()).then(a.ordinal().cmp(&b.ordinal())));
        Ok(Some(plan))
    }
}

impl Janitor {
    /// Time one agent spends on a job alone
    fn work_time(&self, job: &Job, shared: bool) -> Decimal {
        match job.work {
            Work::Clean | Work::Assist => job.dirtiness,
            // Half rate, helped by an assisting agent
            Work::ExtraClean if shared => job.dirtiness,
            Work::ExtraClean => job.dirtiness * Decimal::TWO,
        }
    }
}
