use std::collections::VecDeque;

use updatecast_common::Priority;

use crate::strategy::{AgingInsertion, InsertionStrategy};

/// A queued item and its current (possibly aged) priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<T> {
    pub item: T,
    pub priority: Priority,
}

impl<T> Entry<T> {
    pub fn new(item: T, priority: Priority) -> Self {
        Self { item, priority }
    }
}

/// Unsynchronized priority-ordered sequence.
///
/// Head is the highest priority. Placement is delegated to an
/// [`InsertionStrategy`]; callers that need blocking semantics wrap the list
/// in their own lock so that any side tables stay in the same critical section.
#[derive(Debug, Clone)]
pub struct PriorityList<T, S = AgingInsertion> {
    entries: VecDeque<Entry<T>>,
    strategy: S,
}

impl<T> PriorityList<T, AgingInsertion> {
    pub fn new() -> Self {
        Self::with_strategy(AgingInsertion)
    }
}

impl<T> Default for PriorityList<T, AgingInsertion> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S: InsertionStrategy> PriorityList<T, S> {
    pub fn with_strategy(strategy: S) -> Self {
        Self {
            entries: VecDeque::new(),
            strategy,
        }
    }

    /// Place an item according to the strategy.
    pub fn insert(&mut self, item: T, priority: Priority) {
        self.strategy
            .insert(&mut self.entries, Entry::new(item, priority));
        debug_assert!(self.is_ordered());
    }

    /// Put an item at the head regardless of its priority.
    ///
    /// The stored priority is raised to the previous head's when lower, so the
    /// sequence stays ordered.
    pub fn push_front(&mut self, item: T, priority: Priority) {
        let priority = self
            .entries
            .front()
            .map_or(priority, |head| head.priority.max(priority));
        self.entries.push_front(Entry::new(item, priority));
    }

    pub fn pop_front(&mut self) -> Option<Entry<T>> {
        self.entries.pop_front()
    }

    pub fn front(&self) -> Option<&Entry<T>> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.iter()
    }

    /// Recompute every priority and re-sort the whole sequence.
    ///
    /// The sort is stable: entries whose new priorities tie keep their current
    /// relative order. Aging accumulated so far is discarded.
    pub fn rerank(&mut self, mut priority_of: impl FnMut(&T) -> Priority) {
        for entry in self.entries.iter_mut() {
            entry.priority = priority_of(&entry.item);
        }
        self.entries
            .make_contiguous()
            .sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// True when adjacent entries never increase in priority toward the tail.
    pub fn is_ordered(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(head_side, tail_side)| head_side.priority >= tail_side.priority)
    }
}
