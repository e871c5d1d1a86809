//! Queues: priority-ordered blocking work queues for outbound world updates.
//!
//! # Invariants
//! - Adjacent entries are ordered head-side priority >= tail-side priority.
//! - Equal priorities dequeue in insertion order.
//! - Enqueue never fails and never drops an entry.
//! - Every blocking wait re-checks its condition after waking.

mod error;
mod keyed;
mod list;
mod outbox;
mod queue;
mod strategy;
mod table;
mod throttle;

pub use error::{Closed, TryDequeueError};
pub use keyed::KeyedUpdateQueue;
pub use list::{Entry, PriorityList};
pub use outbox::{Lane, OutboundItem, Outbox};
pub use queue::PriorityQueue;
pub use strategy::{AgingInsertion, InsertionStrategy};
pub use table::{BULK_PRIORITY, DEFAULT_PRIORITY, PriorityTable};
pub use throttle::{BandwidthThrottle, ThrottleConfig};

pub use updatecast_common::Priority;

pub fn crate_info() -> &'static str {
    "updatecast-queue v0.1.0"
}
