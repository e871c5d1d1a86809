use std::collections::VecDeque;

use crate::list::Entry;

/// Placement policy for new entries in a priority-ordered sequence.
///
/// The sequence is ordered head (front, next to dequeue) to tail (back).
/// Implementations must leave it ordered by non-increasing priority and must
/// not let an entry starve under a steady stream of higher-priority inserts.
pub trait InsertionStrategy {
    fn insert<T>(&self, entries: &mut VecDeque<Entry<T>>, entry: Entry<T>);
}

/// Default placement: scan from the tail, aging every entry that is overtaken.
///
/// Each visited entry with a priority strictly below the newcomer's gains one
/// point and the scan moves toward the head. The newcomer lands directly behind
/// the first entry whose priority is at least its own, or at the head when no
/// such entry exists. An entry overtaken often enough therefore climbs until
/// nothing can pass it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgingInsertion;

impl InsertionStrategy for AgingInsertion {
    fn insert<T>(&self, entries: &mut VecDeque<Entry<T>>, entry: Entry<T>) {
        let mut index = entries.len();
        while index > 0 {
            let visited = &mut entries[index - 1];
            if visited.priority >= entry.priority {
                break;
            }
            visited.priority = visited.priority.saturating_add(1);
            index -= 1;
        }
        entries.insert(index, entry);
    }
}
