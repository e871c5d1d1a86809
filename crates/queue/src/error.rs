/// Returned by blocking operations once the queue has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue closed")]
pub struct Closed;

/// Errors from non-blocking and bounded-wait dequeues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryDequeueError {
    #[error("queue is empty")]
    Empty,
    #[error("queue closed")]
    Closed,
}

impl From<Closed> for TryDequeueError {
    fn from(_: Closed) -> Self {
        Self::Closed
    }
}
