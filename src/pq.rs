//! Priority queue with lazy deletion
//!
//! Min-heap of scheduled driver inputs keyed by (deadline, tie, id), with a
//! HashMap as the source of truth so entries can be cancelled in O(1).
//! Cancelled entries stay in the heap until they surface and are skipped.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Heap key. Field order gives the ordering: deadline, then insertion tie,
/// then id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    deadline: i64,
    tie: u64,
    id: u64,
}

pub struct MinPq<M> {
    heap: BinaryHeap<Reverse<Key>>,
    live: HashMap<u64, (i64, u64, M)>, // id -> (deadline, tie, metadata)
}

impl<M> Default for MinPq<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MinPq<M> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
        }
    }

    /// Add an item. Returns false if `id` is already queued.
    pub fn add(&mut self, id: u64, deadline: i64, tie: u64, meta: M) -> bool {
        if self.live.contains_key(&id) {
            return false;
        }
        self.live.insert(id, (deadline, tie, meta));
        self.heap.push(Reverse(Key { deadline, tie, id }));
        true
    }

    /// Remove an item by id. Returns the metadata if it was still queued.
    pub fn remove(&mut self, id: u64) -> Option<M> {
        self.live.remove(&id).map(|(_, _, m)| m)
    }

    /// Smallest live deadline.
    pub fn peek_deadline(&mut self) -> Option<i64> {
        self.clean_top();
        self.heap.peek().map(|Reverse(k)| k.deadline)
    }

    /// Pop the minimum item as (id, deadline, metadata).
    pub fn pop(&mut self) -> Option<(u64, i64, M)> {
        loop {
            let Reverse(k) = self.heap.pop()?;
            if !self.is_current(&k) {
                continue;
            }
            if let Some((deadline, _, meta)) = self.live.remove(&k.id) {
                return Some((k.id, deadline, meta));
            }
        }
    }

    /// Pop the minimum item if it is due at or before `now`.
    pub fn pop_due(&mut self, now: i64) -> Option<(u64, i64, M)> {
        match self.peek_deadline() {
            Some(deadline) if deadline <= now => self.pop(),
            _ => None,
        }
    }

    fn is_current(&self, k: &Key) -> bool {
        matches!(self.live.get(&k.id), Some((dl, tie, _)) if *dl == k.deadline && *tie == k.tie)
    }

    fn clean_top(&mut self) {
        while let Some(Reverse(k)) = self.heap.peek() {
            if self.is_current(k) {
                break;
            }
            self.heap.pop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }
}
