//! Transfer tasks, batches and the observable state machine shared by the
//! upload and export flows.

mod error;
mod state;
mod types;

pub use error::TransferError;
pub use state::{
    BatchSummary, Phase, ProgressSnapshot, StateError, TransferState, TransferStateMachine,
};
pub use types::{FailureKind, TaskId, TaskStatus, TransferBatch, TransferTask};
