use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors constructing a limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("max concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),
}

/// Outcome of one item, in completion order.
#[derive(Debug)]
pub enum LimiterOutcome<T, R> {
    /// The worker returned.
    Completed { index: usize, output: R },
    /// The worker panicked. Siblings are unaffected.
    Panicked { index: usize, message: String },
    /// Cancellation was requested before the item was dequeued.
    Skipped { index: usize, item: T },
}

impl<T, R> LimiterOutcome<T, R> {
    /// Position of the item in the submitted list.
    pub fn index(&self) -> usize {
        match self {
            LimiterOutcome::Completed { index, .. }
            | LimiterOutcome::Panicked { index, .. }
            | LimiterOutcome::Skipped { index, .. } => *index,
        }
    }
}

/// Snapshot of a limiter's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterStatus {
    /// Workers currently running.
    pub active: usize,
    /// Maximum concurrent workers.
    pub max_concurrent: usize,
    /// Items waiting for a slot.
    pub queued: usize,
    /// Items whose worker returned or panicked since startup.
    pub total_processed: u64,
    /// Workers that panicked since startup.
    pub total_panicked: u64,
    /// Items skipped because of cancellation since startup.
    pub total_skipped: u64,
}
