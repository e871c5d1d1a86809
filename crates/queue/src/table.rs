use std::collections::HashMap;
use std::hash::Hash;

use updatecast_common::Priority;

/// Priority for anything a table does not list.
pub const DEFAULT_PRIORITY: Priority = 50;

/// Priority for bulk transfers (textures, images) that should yield to everything else.
pub const BULK_PRIORITY: Priority = 1;

/// Class-keyed priority lookup with a fallback.
///
/// Typically keyed by a message or packet kind and handed to a
/// [`PriorityQueue`](crate::PriorityQueue) through [`prioritizer`](Self::prioritizer).
#[derive(Debug, Clone)]
pub struct PriorityTable<K> {
    priorities: HashMap<K, Priority>,
    fallback: Priority,
}

impl<K: Eq + Hash> PriorityTable<K> {
    pub fn new() -> Self {
        Self::with_fallback(DEFAULT_PRIORITY)
    }

    pub fn with_fallback(fallback: Priority) -> Self {
        Self {
            priorities: HashMap::new(),
            fallback,
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, class: K, priority: Priority) -> Self {
        self.set(class, priority);
        self
    }

    pub fn set(&mut self, class: K, priority: Priority) {
        self.priorities.insert(class, priority);
    }

    pub fn priority_of(&self, class: &K) -> Priority {
        self.priorities.get(class).copied().unwrap_or(self.fallback)
    }

    pub fn fallback(&self) -> Priority {
        self.fallback
    }

    /// Turn the table into a priority function over items, classified by `class_of`.
    pub fn prioritizer<T>(
        self,
        class_of: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> impl Fn(&T) -> Priority + Send + Sync + 'static
    where
        K: Send + Sync + 'static,
        T: 'static,
    {
        move |item: &T| self.priority_of(&class_of(item))
    }
}

impl<K: Eq + Hash> Default for PriorityTable<K> {
    fn default() -> Self {
        Self::new()
    }
}
