//! Scheduling: which changed entity each viewpoint should receive next.
//!
//! # Invariants
//! - At most one pending entry per entity per viewpoint.
//! - The dedup map and the ordered sequence change under one lock.
//! - A full re-rank happens only after enough movement or an expired grace deadline.
//!
//! Entities are ranked by squared distance to the viewpoint, discounted by
//! their bounding size and capped, so near and large objects go out first.

mod clock;
mod config;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SchedulerConfig, UpdatecastConfig};
pub use scheduler::{SchedulerStats, ViewpointScheduler, distance_score};

pub fn crate_info() -> &'static str {
    "updatecast-sched v0.1.0"
}
