use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use updatecast_common::Priority;

use crate::error::{Closed, TryDequeueError};
use crate::list::PriorityList;
use crate::strategy::{AgingInsertion, InsertionStrategy};
use crate::table::DEFAULT_PRIORITY;
use crate::throttle::{BandwidthThrottle, ThrottleConfig};

/// Which sub-queue an outbound item travels through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Locally generated input that must be processed immediately. Never throttled.
    Incoming,
    /// Small, latency-critical traffic (acks, pings, terse movement). Never throttled.
    Unthrottled,
    /// Everything else, ordered by priority and metered by the bandwidth budget.
    Prioritized,
}

/// Something the outbox can meter.
pub trait OutboundItem {
    fn lane(&self) -> Lane;

    fn size_bytes(&self) -> usize;

    /// Whether this is a retransmission; resends shrink the bandwidth budget.
    fn is_resend(&self) -> bool {
        false
    }
}

struct OutboxState<T, S> {
    incoming: VecDeque<T>,
    unthrottled: VecDeque<T>,
    prioritized: PriorityList<T, S>,
    throttle: BandwidthThrottle,
    queued_resends: usize,
    closed: bool,
}

impl<T: OutboundItem, S: InsertionStrategy> OutboxState<T, S> {
    fn take_next(&mut self) -> Option<T> {
        let item = if let Some(item) = self.incoming.pop_front() {
            item
        } else if let Some(item) = self.unthrottled.pop_front() {
            item
        } else if self.throttle.can_send() {
            self.prioritized.pop_front()?.item
        } else {
            return None;
        };

        if item.lane() != Lane::Incoming {
            self.throttle.record_sent(item.size_bytes());
        }
        if item.is_resend() {
            self.queued_resends = self.queued_resends.saturating_sub(1);
        }
        Some(item)
    }

    fn len(&self) -> usize {
        self.incoming.len() + self.unthrottled.len() + self.prioritized.len()
    }

    /// Prioritized lane drained and budget left in this period.
    fn has_room(&self) -> bool {
        self.prioritized.is_empty() && self.throttle.can_send()
    }
}

/// Per-connection outbound queue with lanes and an adaptive bandwidth budget.
///
/// [`dequeue`](Self::dequeue) serves `Incoming`, then `Unthrottled`, then the
/// prioritized lane while the current period's budget lasts. The owner calls
/// [`refresh`](Self::refresh) once per `refresh_interval` to open a new period.
///
/// A producer that ranks its own backlog (such as a viewpoint scheduler) should
/// hand over one item at a time through [`wait_for_room`](Self::wait_for_room),
/// so that held-back work stays in its ranked queue rather than in this lane.
pub struct Outbox<T, S = AgingInsertion> {
    state: Mutex<OutboxState<T, S>>,
    available: Condvar,
    room: Condvar,
    prioritizer: Option<Box<dyn Fn(&T) -> Priority + Send + Sync>>,
}

impl<T: OutboundItem> Outbox<T, AgingInsertion> {
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_strategy(config, AgingInsertion)
    }
}

impl<T: OutboundItem, S: InsertionStrategy> Outbox<T, S> {
    pub fn with_strategy(config: ThrottleConfig, strategy: S) -> Self {
        Self {
            state: Mutex::new(OutboxState {
                incoming: VecDeque::new(),
                unthrottled: VecDeque::new(),
                prioritized: PriorityList::with_strategy(strategy),
                throttle: BandwidthThrottle::new(config),
                queued_resends: 0,
                closed: false,
            }),
            available: Condvar::new(),
            room: Condvar::new(),
            prioritizer: None,
        }
    }

    /// Set the priority function for the prioritized lane.
    pub fn prioritized_by(
        mut self,
        prioritizer: impl Fn(&T) -> Priority + Send + Sync + 'static,
    ) -> Self {
        self.prioritizer = Some(Box::new(prioritizer));
        self
    }

    pub fn enqueue(&self, item: T) {
        let lane = item.lane();
        let priority = match lane {
            Lane::Prioritized => self
                .prioritizer
                .as_ref()
                .map_or(DEFAULT_PRIORITY, |prioritize| prioritize(&item)),
            _ => 0,
        };

        let mut state = self.state.lock();
        if item.is_resend() {
            state.queued_resends += 1;
            if lane != Lane::Incoming {
                state.throttle.record_resent(item.size_bytes());
            }
        }
        match lane {
            Lane::Incoming => state.incoming.push_back(item),
            Lane::Unthrottled => state.unthrottled.push_back(item),
            Lane::Prioritized => state.prioritized.insert(item, priority),
        }
        self.available.notify_one();
    }

    /// Next eligible item, blocking while nothing is eligible.
    pub fn dequeue(&self) -> Result<T, Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if let Some(item) = state.take_next() {
                self.signal_room(&state);
                return Ok(item);
            }
            self.available.wait(&mut state);
        }
    }

    /// Next eligible item; `Empty` also covers "queued but over budget".
    pub fn try_dequeue(&self) -> Result<T, TryDequeueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TryDequeueError::Closed);
        }
        let item = state.take_next().ok_or(TryDequeueError::Empty)?;
        self.signal_room(&state);
        Ok(item)
    }

    /// Block until the prioritized lane is drained and the current period has
    /// budget left, or the outbox is closed.
    pub fn wait_for_room(&self) -> Result<(), Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if state.has_room() {
                return Ok(());
            }
            self.room.wait(&mut state);
        }
    }

    pub fn has_room(&self) -> bool {
        self.state.lock().has_room()
    }

    fn signal_room(&self, state: &OutboxState<T, S>) {
        if state.has_room() {
            self.room.notify_all();
        }
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T, TryDequeueError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            if state.closed {
                return Err(TryDequeueError::Closed);
            }
            if let Some(item) = state.take_next() {
                self.signal_room(&state);
                return Ok(item);
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

    /// Open a new throttle period and wake the consumer, which may now send again.
    pub fn refresh(&self) {
        let mut state = self.state.lock();
        state.throttle.refresh();
        tracing::trace!(
            budget = state.throttle.budget(),
            queued = state.len(),
            "outbox refreshed"
        );
        self.available.notify_all();
        self.signal_room(&state);
    }

    pub fn refresh_interval(&self) -> Duration {
        self.state.lock().throttle.config().refresh_interval()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes allowed in the current period.
    pub fn budget(&self) -> usize {
        self.state.lock().throttle.budget()
    }

    /// Bytes sent in the current period.
    pub fn sent_this_period(&self) -> usize {
        self.state.lock().throttle.sent()
    }

    /// Retransmissions still waiting in any lane.
    pub fn queued_resends(&self) -> usize {
        self.state.lock().queued_resends
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
        self.room.notify_all();
    }
}
