//! Market-based task allocation
//!
//! Outstanding goals become `Task`s. Every bidder prices each task and the
//! earliest estimated finish wins. A winning bid may introduce requirement
//! tasks (e.g. "someone must clear this road first"), which go back into the
//! queue, so cross-agent dependencies are allocated transitively.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::error::{Result, SimError};
use crate::core::types::Deadline;

/// An objective with a deadline and an optional earliest start
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Goal {
    pub predicate: Vec<String>,
    pub deadline: Deadline,
    pub earliest: Option<Decimal>,
}

impl Goal {
    pub fn new(predicate: Vec<String>, deadline: Deadline) -> Self {
        Self {
            predicate,
            deadline,
            earliest: None,
        }
    }

    pub fn with_earliest(mut self, earliest: Decimal) -> Self {
        self.earliest = Some(earliest);
        self
    }

    /// First element of the predicate tuple, e.g. `cleaned`
    pub fn name(&self) -> &str {
        self.predicate.first().map(String::as_str).unwrap_or("")
    }

    /// Object the predicate is about, e.g. the room in `(cleaned room)`
    pub fn subject(&self) -> Option<&str> {
        self.predicate.get(1).map(String::as_str)
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) by {}", self.predicate.join(" "), self.deadline)
    }
}

/// A goal together with how much achieving it is worth
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Task {
    pub goal: Goal,
    pub value: Decimal,
}

impl Task {
    pub fn new(goal: Goal, value: Decimal) -> Self {
        Self { goal, value }
    }

    /// Merge tasks for the same goal, summing their values
    ///
    /// The merged goal keeps the latest `earliest` bound, the only one that
    /// satisfies every merged task.
    pub fn combine(tasks: impl IntoIterator<Item = Task>) -> Option<Task> {
        tasks.into_iter().reduce(|mut acc, task| {
            acc.value += task.value;
            acc.goal.earliest = acc.goal.earliest.max(task.goal.earliest);
            acc
        })
    }
}

/// An agent's offer to achieve a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Bid {
    pub agent: String,
    pub estimated_endtime: Decimal,
    pub additional_cost: Decimal,
    pub task: Task,
    /// Tasks someone else must achieve for this bid to hold
    pub requirements: Vec<Task>,
    /// Simulated planning time spent producing the bid
    pub computation_time: Decimal,
}

/// Something that can price tasks
pub trait Bidder {
    fn name(&self) -> &str;

    /// `None` declines the task
    fn generate_bid(&mut self, task: &Task) -> Result<Option<Bid>>;

    fn notify_bid_won(&mut self, bid: &Bid);
}

/// Priority of a task in the allocation queue
///
/// Tasks with equal keys are combined before bidding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub category: u8,
    pub deadline: Deadline,
    pub predicate: Vec<String>,
}

impl TaskKey {
    pub fn new(category: u8, goal: &Goal) -> Self {
        Self {
            category,
            deadline: goal.deadline,
            predicate: goal.predicate.clone(),
        }
    }
}

/// Winning bids plus the simulated time the auction took
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    pub bids: Vec<Bid>,
    pub computation_time: Decimal,
}

impl Allocation {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}

#[derive(Debug, Clone)]
struct PendingTask {
    task: Task,
    /// Goals whose winning bids led to this task, nearest last
    ancestors: Vec<Goal>,
}

/// Tasks grouped by key so that equal keys pop together
struct TaskQueue {
    pending: BTreeMap<TaskKey, Vec<PendingTask>>,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    fn push(&mut self, key: TaskKey, pending: PendingTask) {
        self.pending.entry(key).or_default().push(pending);
    }

    fn pop_equal(&mut self) -> Option<Vec<PendingTask>> {
        self.pending.pop_first().map(|(_, tasks)| tasks)
    }
}

/// Run the auction to completion
///
/// Each round combines equal tasks, asks every bidder for a bid and awards
/// the earliest estimated finish (first bidder wins ties). Bids within a round
/// are priced as if in parallel, so a round costs the slowest bid.
pub fn compute_allocation<B: Bidder>(
    tasks: Vec<Task>,
    bidders: &mut [B],
    key: impl Fn(&Task) -> TaskKey,
) -> Result<Allocation> {
    let mut queue = TaskQueue::new();
    for task in tasks {
        queue.push(
            key(&task),
            PendingTask {
                task,
                ancestors: Vec::new(),
            },
        );
    }

    let mut allocation: BTreeMap<Goal, Bid> = BTreeMap::new();
    let mut computation_time = Decimal::ZERO;

    while let Some(group) = queue.pop_equal() {
        let ancestors: Vec<Goal> = group
            .iter()
            .flat_map(|p| p.ancestors.iter().cloned())
            .collect();
        let Some(task) = Task::combine(group.into_iter().map(|p| p.task)) else {
            continue;
        };

        if let Some(current) = allocation.get_mut(&task.goal) {
            debug!(goal = %task.goal, "merging task into existing allocation");
            if let Some(merged) = Task::combine([current.task.clone(), task]) {
                current.task = merged;
            }
            continue;
        }

        let mut bids = Vec::new();
        for bidder in bidders.iter_mut() {
            if let Some(bid) = bidder.generate_bid(&task)? {
                bids.push(bid);
            }
        }

        let Some(round_time) = bids.iter().map(|b| b.computation_time).max() else {
            warn!(goal = %task.goal, "no bids for task, dropping it");
            continue;
        };
        computation_time += round_time;

        let mut winner = 0;
        for (i, bid) in bids.iter().enumerate() {
            if bid.estimated_endtime < bids[winner].estimated_endtime {
                winner = i;
            }
        }
        let winning_bid = bids.swap_remove(winner);
        debug!(agent = %winning_bid.agent, goal = %task.goal, "bid won");

        if let Some(bidder) = bidders.iter_mut().find(|b| b.name() == winning_bid.agent) {
            bidder.notify_bid_won(&winning_bid);
        }

        let mut lineage = ancestors;
        lineage.push(task.goal.clone());
        for requirement in &winning_bid.requirements {
            if lineage
                .iter()
                .any(|g| g.predicate == requirement.goal.predicate)
            {
                return Err(SimError::AllocationCycle(requirement.goal.to_string()));
            }
            queue.push(
                key(requirement),
                PendingTask {
                    task: requirement.clone(),
                    ancestors: lineage.clone(),
                },
            );
        }

        allocation.insert(task.goal.clone(), winning_bid);
    }

    let mut bids: Vec<Bid> = allocation.into_values().collect();
    bids.sort_by(|a, b| {
        (a.task.goal.deadline, &a.task.goal.predicate)
            .cmp(&(b.task.goal.deadline, &b.task.goal.predicate))
    });
    info!(
        bids = bids.len(),
        time = %computation_time,
        "allocation computed"
    );
    Ok(Allocation {
        bids,
        computation_time,
    })
}
