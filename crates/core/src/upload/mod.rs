//! Batch uploads.
//!
//! [`UploadOrchestrator`] validates a selection of files, turns the accepted
//! ones into transfer tasks and runs them through the shared
//! [`ConcurrencyLimiter`](crate::limiter::ConcurrencyLimiter). Progress is
//! observable through the [`TransferStateMachine`](crate::transfer::TransferStateMachine)
//! and a settled run is announced on the event bus.

mod config;
mod orchestrator;
mod types;

pub use config::UploadConfig;
pub use orchestrator::UploadOrchestrator;
pub use types::{BatchHandle, SubmitWarning, UploadError};
