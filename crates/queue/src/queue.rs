use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use updatecast_common::Priority;

use crate::error::{Closed, TryDequeueError};
use crate::list::PriorityList;
use crate::strategy::{AgingInsertion, InsertionStrategy};
use crate::table::DEFAULT_PRIORITY;

type Prioritizer<T> = Box<dyn Fn(&T) -> Priority + Send + Sync>;

struct QueueState<T, S> {
    list: PriorityList<T, S>,
    closed: bool,
}

/// Thread-safe blocking priority queue.
///
/// Producers never block beyond the critical section; a consumer blocks in
/// [`dequeue`](Self::dequeue) until an item arrives or the queue is closed.
/// The lock and condition variable belong to the instance.
pub struct PriorityQueue<T, S = AgingInsertion> {
    state: Mutex<QueueState<T, S>>,
    available: Condvar,
    prioritizer: Option<Prioritizer<T>>,
}

impl<T> PriorityQueue<T, AgingInsertion> {
    /// Queue with aging insertion and a constant [`DEFAULT_PRIORITY`] for
    /// [`enqueue_ranked`](Self::enqueue_ranked).
    pub fn new() -> Self {
        Self::with_strategy(AgingInsertion)
    }

    /// Queue with aging insertion and the given priority function.
    pub fn with_prioritizer(
        prioritizer: impl Fn(&T) -> Priority + Send + Sync + 'static,
    ) -> Self {
        Self::new().prioritized_by(prioritizer)
    }
}

impl<T> Default for PriorityQueue<T, AgingInsertion> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S: InsertionStrategy> PriorityQueue<T, S> {
    pub fn with_strategy(strategy: S) -> Self {
        Self {
            state: Mutex::new(QueueState {
                list: PriorityList::with_strategy(strategy),
                closed: false,
            }),
            available: Condvar::new(),
            prioritizer: None,
        }
    }

    /// Replace the priority function used by [`enqueue_ranked`](Self::enqueue_ranked).
    pub fn prioritized_by(
        mut self,
        prioritizer: impl Fn(&T) -> Priority + Send + Sync + 'static,
    ) -> Self {
        self.prioritizer = Some(Box::new(prioritizer));
        self
    }

    /// Insert with an explicit priority and wake one waiting consumer.
    pub fn enqueue(&self, item: T, priority: Priority) {
        let mut state = self.state.lock();
        state.list.insert(item, priority);
        tracing::trace!(priority, len = state.list.len(), "enqueued");
        self.available.notify_one();
    }

    /// Insert using the injected priority function.
    pub fn enqueue_ranked(&self, item: T) {
        let priority = self
            .prioritizer
            .as_ref()
            .map_or(DEFAULT_PRIORITY, |prioritize| prioritize(&item));
        self.enqueue(item, priority);
    }

    /// Insert at the head, skipping placement. Used for immediate redelivery.
    pub fn add_first(&self, item: T, priority: Priority) {
        let mut state = self.state.lock();
        state.list.push_front(item, priority);
        tracing::trace!(priority, "added at head");
        self.available.notify_one();
    }

    /// Remove the head, blocking while the queue is empty.
    pub fn dequeue(&self) -> Result<T, Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if let Some(entry) = state.list.pop_front() {
                return Ok(entry.item);
            }
            self.available.wait(&mut state);
        }
    }

    /// Remove the head without blocking.
    pub fn try_dequeue(&self) -> Result<T, TryDequeueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TryDequeueError::Closed);
        }
        state
            .list
            .pop_front()
            .map(|entry| entry.item)
            .ok_or(TryDequeueError::Empty)
    }

    /// Like [`dequeue`](Self::dequeue) but gives up with `Empty` after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T, TryDequeueError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            if state.closed {
                return Err(TryDequeueError::Closed);
            }
            if let Some(entry) = state.list.pop_front() {
                return Ok(entry.item);
            }
            if timed_out {
                return Err(TryDequeueError::Empty);
            }
            match deadline {
                Some(deadline) => {
                    timed_out = self.available.wait_until(&mut state, deadline).timed_out();
                }
                // Unrepresentable deadline: wait without a bound.
                None => self.available.wait(&mut state),
            }
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().list.len()
    }

    pub fn has_queued_items(&self) -> bool {
        !self.state.lock().list.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_queued_items()
    }

    /// Shut the queue down and wake every blocked consumer with [`Closed`].
    ///
    /// Later enqueues are still accepted but no longer handed out.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        tracing::debug!(remaining = state.list.len(), "priority queue closed");
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T: Clone, S: InsertionStrategy> PriorityQueue<T, S> {
    /// Copy of the sequence, head first, with current priorities.
    pub fn snapshot(&self) -> Vec<(T, Priority)> {
        self.state
            .lock()
            .list
            .iter()
            .map(|entry| (entry.item.clone(), entry.priority))
            .collect()
    }
}
