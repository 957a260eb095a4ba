//! Time-ordered queue of action states

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::action_state::ActionState;

/// Min-heap of action states with batched pops
#[derive(Debug, Clone, Default)]
pub struct ActionStateQueue {
    heap: BinaryHeap<Reverse<ActionState>>,
}

impl ActionStateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: ActionState) {
        self.heap.push(Reverse(state));
    }

    pub fn extend(&mut self, states: impl IntoIterator<Item = ActionState>) {
        self.heap.extend(states.into_iter().map(Reverse));
    }

    pub fn peek(&self) -> Option<&ActionState> {
        self.heap.peek().map(|Reverse(s)| s)
    }

    pub fn pop(&mut self) -> Option<ActionState> {
        self.heap.pop().map(|Reverse(s)| s)
    }

    /// Pop the lowest state and every other state sharing its time and execution state
    pub fn pop_batch(&mut self) -> Vec<ActionState> {
        let Some(first) = self.pop() else {
            return Vec::new();
        };
        let (time, state) = (first.time, first.state);
        let mut batch = vec![first];
        while self
            .peek()
            .map(|next| next.time == time && next.state == state)
            .unwrap_or(false)
        {
            if let Some(next) = self.pop() {
                batch.push(next);
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every state, in no particular order
    pub fn drain(&mut self) -> Vec<ActionState> {
        self.heap.drain().map(|Reverse(s)| s).collect()
    }

    /// All states in queue order
    pub fn into_sorted_vec(self) -> Vec<ActionState> {
        let mut states: Vec<ActionState> = self.heap.into_iter().map(|Reverse(s)| s).collect();
        states.sort();
        states
    }
}

impl FromIterator<ActionState> for ActionStateQueue {
    fn from_iter<I: IntoIterator<Item = ActionState>>(iter: I) -> Self {
        Self {
            heap: iter.into_iter().map(Reverse).collect(),
        }
    }
}
