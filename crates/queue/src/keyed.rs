use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Closed, TryDequeueError};

struct KeyedState<K, V> {
    order: VecDeque<K>,
    updates: HashMap<K, V>,
    closed: bool,
}

impl<K: Eq + Hash, V> KeyedState<K, V> {
    fn pop(&mut self) -> Option<(K, V)> {
        while let Some(key) = self.order.pop_front() {
            if let Some(update) = self.updates.remove(&key) {
                return Some((key, update));
            }
        }
        None
    }
}

/// Blocking FIFO of the latest update per key.
///
/// Enqueuing a key that is already waiting replaces its payload in place, so a
/// rapidly changing object keeps its position in line and only its newest
/// state is delivered.
pub struct KeyedUpdateQueue<K, V> {
    state: Mutex<KeyedState<K, V>>,
    available: Condvar,
}

impl<K: Eq + Hash + Clone, V> KeyedUpdateQueue<K, V> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KeyedState {
                order: VecDeque::new(),
                updates: HashMap::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queue `update` for `key`. Returns `false` when it replaced a waiting update.
    pub fn enqueue(&self, key: K, update: V) -> bool {
        let mut state = self.state.lock();
        let fresh = state.updates.insert(key.clone(), update).is_none();
        if fresh {
            state.order.push_back(key);
        }
        self.available.notify_one();
        fresh
    }

    /// Remove the oldest key and its latest update, blocking while empty.
    pub fn dequeue(&self) -> Result<(K, V), Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if let Some(next) = state.pop() {
                return Ok(next);
            }
            self.available.wait(&mut state);
        }
    }

    pub fn try_dequeue(&self) -> Result<(K, V), TryDequeueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TryDequeueError::Closed);
        }
        state.pop().ok_or(TryDequeueError::Empty)
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<(K, V), TryDequeueError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            if state.closed {
                return Err(TryDequeueError::Closed);
            }
            if let Some(next) = state.pop() {
                return Ok(next);
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
        self.state.lock().updates.len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().updates.contains_key(key)
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}

impl<K: Eq + Hash + Clone, V> Default for KeyedUpdateQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn replacing_keeps_place_in_line() {
        let queue = KeyedUpdateQueue::new();
        assert!(queue.enqueue("a", 1));
        assert!(queue.enqueue("b", 1));
        assert!(!queue.enqueue("a", 2));
        assert_eq!(queue.count(), 2);

        assert_eq!(queue.dequeue(), Ok(("a", 2)));
        assert_eq!(queue.dequeue(), Ok(("b", 1)));
        assert_eq!(queue.try_dequeue(), Err(TryDequeueError::Empty));
    }

    #[test]
    fn key_requeues_after_dequeue() {
        let queue = KeyedUpdateQueue::new();
        queue.enqueue(7u32, "first");
        assert_eq!(queue.dequeue(), Ok((7, "first")));
        assert!(!queue.contains(&7));
        assert!(queue.enqueue(7, "second"));
        assert_eq!(queue.dequeue(), Ok((7, "second")));
    }

    #[test]
    fn dequeue_timeout_on_empty() {
        let queue: KeyedUpdateQueue<u8, u8> = KeyedUpdateQueue::new();
        assert_eq!(
            queue.dequeue_timeout(Duration::from_millis(10)),
            Err(TryDequeueError::Empty)
        );
    }

    #[test]
    fn dequeue_timeout_with_max_duration() {
        let queue = KeyedUpdateQueue::new();
        queue.enqueue(1u8, "pos");
        assert_eq!(queue.dequeue_timeout(Duration::MAX), Ok((1, "pos")));
    }

    #[test]
    fn close_wakes_waiter() {
        let queue: Arc<KeyedUpdateQueue<u8, u8>> = Arc::new(KeyedUpdateQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(waiter.join().unwrap(), Err(Closed));
    }
}
