//! Behavior Queue
//!
//! Activated behaviors waiting to run in the current event, lowest order
//! first. Orders can change while behaviors sit in the queue (relinking
//! inside an event), in which case the queue is rebuilt with fresh keys.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::node::BehaviorId;

#[derive(Debug, Default)]
pub(crate) struct BehaviorQueue {
    heap: BinaryHeap<Reverse<(u64, BehaviorId)>>,
}

impl BehaviorQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, behavior: BehaviorId, order: u64) {
        self.heap.push(Reverse((order, behavior)));
    }

    /// Remove and return the behavior with the lowest order.
    pub(crate) fn pop(&mut self) -> Option<BehaviorId> {
        self.heap.pop().map(|Reverse((_, behavior))| behavior)
    }

    /// Re-key every queued behavior after orders changed.
    pub(crate) fn reheap(&mut self, order_of: impl Fn(BehaviorId) -> u64) {
        let entries = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries
            .into_iter()
            .map(|Reverse((_, behavior))| Reverse((order_of(behavior), behavior)))
            .collect();
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
