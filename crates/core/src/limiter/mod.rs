//! Bounded worker pool.
//!
//! [`ConcurrencyLimiter`] runs a list of items through an async worker with at
//! most `max_concurrency` workers in flight. Slots are handed to the next
//! queued item as soon as any worker returns, and outcomes are streamed in
//! completion order.

mod pool;
mod types;

pub use pool::{ConcurrencyLimiter, LimiterRun};
pub use types::{LimiterError, LimiterOutcome, LimiterStatus};
