use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use parking_lot::{Condvar, Mutex};
use updatecast_common::{EntityId, EntityState, Priority};
use updatecast_queue::{Closed, PriorityList, TryDequeueError};

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;

/// Distance score of an entity seen from `viewpoint`; lower is more urgent.
///
/// Squared distance minus the size bonus, clamped to `[0, max_priority]`.
pub fn distance_score(config: &SchedulerConfig, viewpoint: Vec3, entity: &EntityState) -> Priority {
    let distance_sq = viewpoint.distance_squared(entity.position);
    let bonus = entity.bounding_size.length_squared() * config.size_bonus_factor;
    (distance_sq - bonus).clamp(0.0, config.max_priority as f32) as Priority
}

/// Queue priority: the sequence is max-first, so invert the distance score.
fn queue_priority(config: &SchedulerConfig, viewpoint: Vec3, entity: &EntityState) -> Priority {
    config
        .max_priority
        .saturating_sub(distance_score(config, viewpoint, entity))
}

/// Counters for instrumentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    /// Entities that entered the working set.
    pub marked: u64,
    /// Repeated changes folded into an already pending entry.
    pub coalesced: u64,
    /// Entities handed to the transmission layer.
    pub dispatched: u64,
    /// Full re-ranks performed.
    pub resorts: u64,
    /// Working-set size at the last re-rank.
    pub last_resort_len: usize,
    /// Time spent in the last re-rank.
    pub last_resort_time: Duration,
}

#[derive(Debug, Clone, Copy)]
enum ResortReason {
    Moved,
    GraceExpired,
}

struct ViewpointState {
    pending: PriorityList<EntityId>,
    tracked: HashMap<EntityId, EntityState>,
    viewpoint: Vec3,
    last_resort_position: Vec3,
    refresh_deadline: Option<Instant>,
    stats: SchedulerStats,
    closed: bool,
}

impl ViewpointState {
    fn take_next(&mut self) -> Option<EntityId> {
        let entry = self.pending.pop_front()?;
        self.tracked.remove(&entry.item);
        self.stats.dispatched += 1;
        tracing::trace!(entity = %entry.item, priority = entry.priority, "dispatched");
        Some(entry.item)
    }
}

/// Working set of changed entities for one connected viewpoint.
///
/// Producers report changes with [`mark_dirty`](Self::mark_dirty); the
/// viewpoint's send loop drains them nearest-first with
/// [`pop_next`](Self::pop_next). The session feeds viewpoint movement through
/// [`update_viewpoint`](Self::update_viewpoint), which re-ranks only when the
/// viewpoint has moved far enough or a grace deadline has passed.
pub struct ViewpointScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<ViewpointState>,
    available: Condvar,
}

impl ViewpointScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(ViewpointState {
                pending: PriorityList::new(),
                tracked: HashMap::new(),
                viewpoint: Vec3::ZERO,
                last_resort_position: Vec3::ZERO,
                refresh_deadline: None,
                stats: SchedulerStats::default(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Report a change to an entity.
    ///
    /// Returns `true` if the entity entered the working set. A change to an
    /// entity that is already pending only refreshes its stored position and
    /// size and arms the grace deadline if none is armed.
    pub fn mark_dirty(&self, id: EntityId, position: Vec3, bounding_size: Vec3) -> bool {
        let entity = EntityState::new(position, bounding_size);
        let mut state = self.state.lock();

        if let Some(tracked) = state.tracked.get_mut(&id) {
            *tracked = entity;
            state.stats.coalesced += 1;
            if state.refresh_deadline.is_none() {
                state.refresh_deadline = Some(self.clock.now() + self.config.grace_window());
                tracing::trace!(entity = %id, "grace deadline armed");
            }
            return false;
        }

        let priority = queue_priority(&self.config, state.viewpoint, &entity);
        state.tracked.insert(id, entity);
        state.pending.insert(id, priority);
        state.stats.marked += 1;
        tracing::trace!(entity = %id, priority, "pending");
        self.available.notify_one();
        true
    }

    /// Put an entity back at the head after a failed send.
    ///
    /// Returns `false` without changes if the entity is already pending.
    pub fn redeliver(&self, id: EntityId, position: Vec3, bounding_size: Vec3) -> bool {
        let entity = EntityState::new(position, bounding_size);
        let mut state = self.state.lock();
        if state.tracked.contains_key(&id) {
            return false;
        }
        let priority = queue_priority(&self.config, state.viewpoint, &entity);
        state.tracked.insert(id, entity);
        state.pending.push_front(id, priority);
        tracing::debug!(entity = %id, "redelivering at head");
        self.available.notify_one();
        true
    }

    /// Report the viewpoint's current position.
    ///
    /// Returns `true` if the working set was re-ranked.
    pub fn update_viewpoint(&self, position: Vec3) -> bool {
        let mut state = self.state.lock();
        state.viewpoint = position;

        let threshold = self.config.resort_distance;
        let moved_sq = state.last_resort_position.distance_squared(position);
        let reason = if moved_sq > threshold * threshold {
            ResortReason::Moved
        } else if state
            .refresh_deadline
            .is_some_and(|deadline| self.clock.now() >= deadline)
        {
            ResortReason::GraceExpired
        } else {
            return false;
        };

        let _span = tracing::info_span!("viewpoint_resort").entered();
        let started = Instant::now();

        let ViewpointState {
            pending, tracked, ..
        } = &mut *state;
        pending.rerank(|id| {
            tracked
                .get(id)
                .map_or(0, |entity| queue_priority(&self.config, position, entity))
        });

        state.refresh_deadline = None;
        state.last_resort_position = position;
        state.stats.resorts += 1;
        state.stats.last_resort_len = state.pending.len();
        state.stats.last_resort_time = started.elapsed();

        tracing::debug!(
            ?reason,
            pending = state.pending.len(),
            elapsed = ?state.stats.last_resort_time,
            "working set re-ranked"
        );
        true
    }

    /// Nearest pending entity, blocking while the working set is empty.
    pub fn pop_next(&self) -> Result<EntityId, Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if let Some(id) = state.take_next() {
                return Ok(id);
            }
            self.available.wait(&mut state);
        }
    }

    /// Nearest pending entity, or `Empty` right away.
    pub fn try_pop_next(&self) -> Result<EntityId, TryDequeueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TryDequeueError::Closed);
        }
        state.take_next().ok_or(TryDequeueError::Empty)
    }

    pub fn pop_next_timeout(&self, timeout: Duration) -> Result<EntityId, TryDequeueError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            if state.closed {
                return Err(TryDequeueError::Closed);
            }
            if let Some(id) = state.take_next() {
                return Ok(id);
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

    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_pending(&self, id: EntityId) -> bool {
        self.state.lock().tracked.contains_key(&id)
    }

    /// Pending entities in send order.
    pub fn pending_order(&self) -> Vec<EntityId> {
        self.state.lock().pending.iter().map(|e| e.item).collect()
    }

    pub fn last_resort_position(&self) -> Vec3 {
        self.state.lock().last_resort_position
    }

    pub fn has_refresh_deadline(&self) -> bool {
        self.state.lock().refresh_deadline.is_some()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.state.lock().stats.clone()
    }

    /// Tear down: wake the send loop with [`Closed`].
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        tracing::debug!(pending = state.pending.len(), "viewpoint scheduler closed");
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crate::clock::ManualClock;

    fn id(n: u128) -> EntityId {
        EntityId::from_u128(n)
    }

    fn at(x: f32) -> Vec3 {
        Vec3::new(x, 0.0, 0.0)
    }

    /// Point-sized entities so the size bonus does not interfere.
    const POINT: Vec3 = Vec3::ZERO;

    fn scheduler_with_clock() -> (ViewpointScheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ViewpointScheduler::with_clock(SchedulerConfig::default(), clock.clone());
        (scheduler, clock)
    }

    #[test]
    fn distance_score_formula() {
        let config = SchedulerConfig::default();
        let point = EntityState::new(at(10.0), POINT);
        assert_eq!(distance_score(&config, Vec3::ZERO, &point), 100);

        // Diagonal^2 = 3, bonus = 36.
        let boxed = EntityState::new(at(10.0), Vec3::ONE);
        assert_eq!(distance_score(&config, Vec3::ZERO, &boxed), 64);

        let huge = EntityState::new(at(10.0), Vec3::splat(10.0));
        assert_eq!(distance_score(&config, Vec3::ZERO, &huge), 0);

        let far = EntityState::new(at(1000.0), POINT);
        assert_eq!(distance_score(&config, Vec3::ZERO, &far), config.max_priority);
    }

    #[test]
    fn nearest_entity_is_sent_first() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        scheduler.mark_dirty(id(1), at(30.0), POINT);
        scheduler.mark_dirty(id(2), at(5.0), POINT);
        scheduler.mark_dirty(id(3), at(12.0), POINT);

        assert_eq!(scheduler.try_pop_next(), Ok(id(2)));
        assert_eq!(scheduler.try_pop_next(), Ok(id(3)));
        assert_eq!(scheduler.try_pop_next(), Ok(id(1)));
        assert_eq!(scheduler.try_pop_next(), Err(TryDequeueError::Empty));
    }

    #[test]
    fn large_object_outranks_nearer_small_one() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        scheduler.mark_dirty(id(1), at(8.0), POINT);
        // 20^2 - 12 * 3 * 4^2 = 400 - 576 -> 0.
        scheduler.mark_dirty(id(2), at(20.0), Vec3::splat(4.0));
        assert_eq!(scheduler.pending_order(), vec![id(2), id(1)]);
    }

    #[test]
    fn capped_entities_keep_arrival_order() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        scheduler.mark_dirty(id(1), at(500.0), POINT);
        scheduler.mark_dirty(id(2), at(900.0), POINT);
        scheduler.mark_dirty(id(3), at(200.0), POINT);
        assert_eq!(scheduler.pending_order(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn duplicate_marks_coalesce() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        assert!(scheduler.mark_dirty(id(7), at(3.0), POINT));
        assert!(!scheduler.mark_dirty(id(7), at(4.0), POINT));
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.stats().coalesced, 1);
    }

    #[test]
    fn pop_then_mark_again_re_enters_pending() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        let x = id(42);
        scheduler.mark_dirty(x, at(1.0), POINT);
        scheduler.mark_dirty(x, at(2.0), POINT);

        assert_eq!(scheduler.try_pop_next(), Ok(x));
        assert!(!scheduler.is_pending(x));
        assert_eq!(scheduler.try_pop_next(), Err(TryDequeueError::Empty));

        assert!(scheduler.mark_dirty(x, at(2.0), POINT));
        assert!(scheduler.has_pending());
        assert_eq!(scheduler.try_pop_next(), Ok(x));
        assert_eq!(scheduler.stats().dispatched, 2);
    }

    #[test]
    fn small_movement_does_not_rerank() {
        let (scheduler, _clock) = scheduler_with_clock();
        scheduler.mark_dirty(id(1), at(10.0), POINT);
        scheduler.mark_dirty(id(2), at(-10.0), POINT);
        let before = scheduler.pending_order();

        for step in 1..=10 {
            assert!(!scheduler.update_viewpoint(at(step as f32)));
        }
        assert_eq!(scheduler.stats().resorts, 0);
        assert_eq!(scheduler.pending_order(), before);
        assert_eq!(scheduler.last_resort_position(), Vec3::ZERO);
    }

    #[test]
    fn large_movement_reranks_against_new_position() {
        let (scheduler, _clock) = scheduler_with_clock();
        scheduler.mark_dirty(id(1), at(-40.0), POINT);
        scheduler.mark_dirty(id(2), at(40.0), POINT);
        scheduler.mark_dirty(id(3), at(5.0), POINT);
        assert_eq!(scheduler.pending_order(), vec![id(3), id(1), id(2)]);

        assert!(scheduler.update_viewpoint(at(38.0)));
        assert_eq!(scheduler.pending_order(), vec![id(2), id(3), id(1)]);
        assert_eq!(scheduler.last_resort_position(), at(38.0));
        let stats = scheduler.stats();
        assert_eq!(stats.resorts, 1);
        assert_eq!(stats.last_resort_len, 3);
    }

    #[test]
    fn movement_threshold_is_measured_from_last_rerank() {
        let (scheduler, _clock) = scheduler_with_clock();
        scheduler.mark_dirty(id(1), at(1.0), POINT);
        assert!(!scheduler.update_viewpoint(at(10.0)));
        assert!(!scheduler.update_viewpoint(at(15.0)));
        assert!(scheduler.update_viewpoint(at(15.5)));
        assert!(!scheduler.update_viewpoint(at(25.0)));
    }

    #[test]
    fn repeated_mark_forces_catch_up_after_grace_window() {
        let (scheduler, clock) = scheduler_with_clock();
        scheduler.mark_dirty(id(1), at(10.0), POINT);
        assert!(!scheduler.has_refresh_deadline());

        scheduler.mark_dirty(id(1), at(11.0), POINT);
        assert!(scheduler.has_refresh_deadline());

        clock.advance(Duration::from_millis(999));
        assert!(!scheduler.update_viewpoint(at(1.0)));

        clock.advance(Duration::from_millis(1));
        assert!(scheduler.update_viewpoint(at(1.0)));
        assert!(!scheduler.has_refresh_deadline());
        assert_eq!(scheduler.stats().resorts, 1);

        // Deadline cleared: the same position is a no-op again.
        assert!(!scheduler.update_viewpoint(at(1.0)));
    }

    #[test]
    fn grace_deadline_is_not_pushed_back_by_further_marks() {
        let (scheduler, clock) = scheduler_with_clock();
        scheduler.mark_dirty(id(1), at(10.0), POINT);
        scheduler.mark_dirty(id(1), at(10.0), POINT);
        clock.advance(Duration::from_millis(600));
        scheduler.mark_dirty(id(1), at(10.0), POINT);
        clock.advance(Duration::from_millis(400));
        assert!(scheduler.update_viewpoint(Vec3::ZERO));
    }

    #[test]
    fn catch_up_rerank_uses_latest_entity_positions() {
        let (scheduler, clock) = scheduler_with_clock();
        scheduler.mark_dirty(id(1), at(5.0), POINT);
        scheduler.mark_dirty(id(2), at(20.0), POINT);
        // Entity 1 moves away before it was sent.
        scheduler.mark_dirty(id(1), at(60.0), POINT);
        assert_eq!(scheduler.pending_order(), vec![id(1), id(2)]);

        clock.advance(Duration::from_secs(1));
        assert!(scheduler.update_viewpoint(Vec3::ZERO));
        assert_eq!(scheduler.pending_order(), vec![id(2), id(1)]);
    }

    #[test]
    fn new_marks_rank_against_latest_viewpoint() {
        let (scheduler, _clock) = scheduler_with_clock();
        scheduler.update_viewpoint(at(5.0));
        scheduler.mark_dirty(id(1), at(-4.0), POINT);
        scheduler.mark_dirty(id(2), at(12.0), POINT);
        assert_eq!(scheduler.pending_order(), vec![id(2), id(1)]);
    }

    #[test]
    fn redeliver_goes_to_head() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        scheduler.mark_dirty(id(1), at(1.0), POINT);
        assert!(scheduler.redeliver(id(9), at(80.0), POINT));
        assert!(!scheduler.redeliver(id(1), at(1.0), POINT));
        assert_eq!(scheduler.try_pop_next(), Ok(id(9)));
        assert_eq!(scheduler.try_pop_next(), Ok(id(1)));
    }

    #[test]
    fn pop_next_blocks_until_marked() {
        let scheduler = Arc::new(ViewpointScheduler::new(SchedulerConfig::default()));
        let consumer = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || scheduler.pop_next())
        };
        thread::sleep(Duration::from_millis(20));
        scheduler.mark_dirty(id(5), at(1.0), POINT);
        assert_eq!(consumer.join().unwrap(), Ok(id(5)));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let scheduler = Arc::new(ViewpointScheduler::new(SchedulerConfig::default()));
        let consumer = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || scheduler.pop_next())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!scheduler.is_closed());
        scheduler.close();
        assert_eq!(consumer.join().unwrap(), Err(Closed));
        assert!(scheduler.is_closed());
        assert_eq!(scheduler.try_pop_next(), Err(TryDequeueError::Closed));
    }

    #[test]
    fn pop_next_timeout_on_empty_working_set() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        assert_eq!(
            scheduler.pop_next_timeout(Duration::from_millis(10)),
            Err(TryDequeueError::Empty)
        );
    }

    #[test]
    fn pop_next_timeout_with_max_duration() {
        let scheduler = ViewpointScheduler::new(SchedulerConfig::default());
        assert_eq!(scheduler.config(), &SchedulerConfig::default());
        scheduler.mark_dirty(id(4), at(2.0), POINT);
        assert_eq!(scheduler.pop_next_timeout(Duration::MAX), Ok(id(4)));
    }

    #[test]
    fn concurrent_producers_never_duplicate_an_entity() {
        let scheduler = Arc::new(ViewpointScheduler::new(SchedulerConfig::default()));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    for round in 0..50 {
                        for n in 0..100u128 {
                            let x = (n as f32) + (p * 50 + round) as f32 * 0.01;
                            scheduler.mark_dirty(id(n), at(x), POINT);
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(scheduler.pending_count(), 100);
        let mut drained = Vec::new();
        while let Ok(next) = scheduler.try_pop_next() {
            drained.push(next);
        }
        drained.sort();
        drained.dedup();
        assert_eq!(drained.len(), 100);

        let stats = scheduler.stats();
        assert_eq!(stats.marked, 100);
        assert_eq!(stats.coalesced, 4 * 50 * 100 - 100);
    }
}
