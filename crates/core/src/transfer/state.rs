//! Observable batch state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use super::types::{TransferBatch, TransferTask};
use crate::repository::InvoiceId;

/// Result of a settled batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub run: u32,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub duplicate_count: usize,
    pub cancelled: bool,
    /// Final task statuses in submission order.
    pub per_task_results: Vec<TransferTask>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    pub fn from_batch(batch: &TransferBatch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            run: batch.run,
            total_count: batch.total_count(),
            success_count: batch.success_count(),
            failure_count: batch.failure_count(),
            duplicate_count: batch.duplicate_count(),
            cancelled: batch.cancellation_requested,
            per_task_results: batch.tasks.clone(),
            finished_at: Utc::now(),
        }
    }

    pub fn completed_count(&self) -> usize {
        self.success_count + self.failure_count + self.duplicate_count
    }

    pub fn invoice_ids(&self) -> Vec<InvoiceId> {
        self.per_task_results
            .iter()
            .filter_map(|t| t.invoice_id().map(str::to_string))
            .collect()
    }

    /// User-facing outcome, distinguishing duplicates from failures.
    pub fn message(&self) -> String {
        let total = self.total_count;
        let ok = self.success_count;
        let dup = self.duplicate_count;
        let failed = self.failure_count;

        if self.cancelled {
            return format!(
                "Upload cancelled: {} of {} file(s) uploaded, {} not uploaded",
                ok,
                total,
                total - ok - dup
            );
        }
        if dup == total {
            return format!("All {} file(s) were already uploaded", total);
        }
        if ok == 0 && dup == 0 {
            return format!(
                "All {} upload(s) failed; retry the failed files or check your connection",
                total
            );
        }

        let mut message = format!("Uploaded {} of {} file(s)", ok, total);
        if dup > 0 {
            message.push_str(&format!(", {} already uploaded", dup));
        }
        if failed > 0 {
            message.push_str(&format!(", {} failed and can be retried", failed));
        }
        message
    }
}

/// Publicly observable state sequence: `Idle -> InProgress -> Completed`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    InProgress(Arc<TransferBatch>),
    Completed(Arc<BatchSummary>),
}

impl TransferState {
    pub fn phase(&self) -> Phase {
        match self {
            TransferState::Idle => Phase::Idle,
            TransferState::InProgress(_) => Phase::InProgress,
            TransferState::Completed(_) => Phase::Completed,
        }
    }

    pub fn batch_id(&self) -> Option<&str> {
        match self {
            TransferState::Idle => None,
            TransferState::InProgress(batch) => Some(&batch.id),
            TransferState::Completed(summary) => Some(&summary.batch_id),
        }
    }

    /// Flattened view for the UI progress stream.
    pub fn snapshot(&self) -> ProgressSnapshot {
        match self {
            TransferState::Idle => ProgressSnapshot {
                phase: Phase::Idle,
                batch_id: None,
                tasks: Vec::new(),
                total_count: 0,
                completed_count: 0,
                success_count: 0,
                failure_count: 0,
                duplicate_count: 0,
                cancellation_requested: false,
                message: None,
            },
            TransferState::InProgress(batch) => ProgressSnapshot {
                phase: Phase::InProgress,
                batch_id: Some(batch.id.clone()),
                tasks: batch.tasks.clone(),
                total_count: batch.total_count(),
                completed_count: batch.completed_count(),
                success_count: batch.success_count(),
                failure_count: batch.failure_count(),
                duplicate_count: batch.duplicate_count(),
                cancellation_requested: batch.cancellation_requested,
                message: None,
            },
            TransferState::Completed(summary) => ProgressSnapshot {
                phase: Phase::Completed,
                batch_id: Some(summary.batch_id.clone()),
                tasks: summary.per_task_results.clone(),
                total_count: summary.total_count,
                completed_count: summary.completed_count(),
                success_count: summary.success_count,
                failure_count: summary.failure_count,
                duplicate_count: summary.duplicate_count,
                cancellation_requested: summary.cancelled,
                message: Some(summary.message()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    InProgress,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::InProgress => "in_progress",
            Phase::Completed => "completed",
        }
    }
}

/// Serializable progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub tasks: Vec<TransferTask>,
    pub total_count: usize,
    pub completed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub duplicate_count: usize,
    pub cancellation_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Batch {got} is not the active batch {active}")]
    BatchMismatch { active: String, got: String },

    #[error("Batch not settled: {completed}/{total} tasks terminal")]
    NotSettled { completed: usize, total: usize },
}

/// Holder of the current [`TransferState`].
///
/// Every accepted transition replaces the whole state, so subscribers only
/// ever see complete snapshots.
#[derive(Clone)]
pub struct TransferStateMachine {
    tx: Arc<watch::Sender<TransferState>>,
}

impl Default for TransferStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TransferState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> TransferState {
        self.tx.borrow().clone()
    }

    /// `Idle | Completed -> InProgress`.
    pub fn begin(&self, batch: TransferBatch) -> Result<(), StateError> {
        self.transition(Phase::InProgress, |state| match state {
            TransferState::InProgress(_) => Err(StateError::InvalidTransition {
                from: Phase::InProgress.as_str(),
                to: Phase::InProgress.as_str(),
            }),
            _ => Ok(TransferState::InProgress(Arc::new(batch))),
        })
    }

    /// Replace the in-progress snapshot of the active batch.
    pub fn update(&self, batch: TransferBatch) -> Result<(), StateError> {
        self.transition(Phase::InProgress, |state| match state {
            TransferState::InProgress(active) if active.id != batch.id => {
                Err(StateError::BatchMismatch {
                    active: active.id.clone(),
                    got: batch.id.clone(),
                })
            }
            TransferState::InProgress(_) => Ok(TransferState::InProgress(Arc::new(batch))),
            other => Err(StateError::InvalidTransition {
                from: other.phase().as_str(),
                to: Phase::InProgress.as_str(),
            }),
        })
    }

    /// `InProgress -> Completed`, once every task of the run is terminal.
    pub fn complete(&self, batch: &TransferBatch) -> Result<Arc<BatchSummary>, StateError> {
        if !batch.is_settled() {
            return Err(StateError::NotSettled {
                completed: batch.completed_count(),
                total: batch.total_count(),
            });
        }
        let summary = Arc::new(BatchSummary::from_batch(batch));
        let published = Arc::clone(&summary);
        self.transition(Phase::Completed, |state| match state {
            TransferState::InProgress(active) if active.id == batch.id => {
                Ok(TransferState::Completed(published))
            }
            TransferState::InProgress(active) => Err(StateError::BatchMismatch {
                active: active.id.clone(),
                got: batch.id.clone(),
            }),
            other => Err(StateError::InvalidTransition {
                from: other.phase().as_str(),
                to: Phase::Completed.as_str(),
            }),
        })?;
        Ok(summary)
    }

    /// `Idle | Completed -> Idle`.
    pub fn reset(&self) -> Result<(), StateError> {
        self.transition(Phase::Idle, |state| match state {
            TransferState::InProgress(_) => Err(StateError::InvalidTransition {
                from: Phase::InProgress.as_str(),
                to: Phase::Idle.as_str(),
            }),
            _ => Ok(TransferState::Idle),
        })
    }

    fn transition(
        &self,
        to: Phase,
        f: impl FnOnce(&TransferState) -> Result<TransferState, StateError>,
    ) -> Result<(), StateError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            match f(state) {
                Ok(next) => {
                    *state = next;
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        if result.is_ok() {
            debug!("Transfer state -> {}", to.as_str());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{TaskStatus, TransferTask};

    fn settled_batch(id: &str) -> TransferBatch {
        TransferBatch::new(id, vec![TransferTask::new("t-0", "/a.pdf", "a.pdf")])
            .with_task_status(0, TaskStatus::InProgress { percent: 0 })
            .unwrap()
            .with_task_status(
                0,
                TaskStatus::Succeeded {
                    invoice_id: "inv-1".into(),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let machine = TransferStateMachine::new();
        assert_eq!(machine.current(), TransferState::Idle);

        let batch = TransferBatch::new("b-1", vec![TransferTask::new("t-0", "/a.pdf", "a.pdf")]);
        machine.begin(batch.clone()).unwrap();
        assert_eq!(machine.current().phase(), Phase::InProgress);

        let done = settled_batch("b-1");
        machine.update(done.clone()).unwrap();
        let summary = machine.complete(&done).unwrap();
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.invoice_ids(), vec!["inv-1".to_string()]);
        assert_eq!(machine.current().phase(), Phase::Completed);

        machine.reset().unwrap();
        assert_eq!(machine.current(), TransferState::Idle);
    }

    #[test]
    fn test_completes_only_once() {
        let machine = TransferStateMachine::new();
        let done = settled_batch("b-1");
        machine.begin(done.clone()).unwrap();
        machine.complete(&done).unwrap();

        let err = machine.complete(&done).unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
    }

    #[test]
    fn test_cannot_complete_unsettled_batch() {
        let machine = TransferStateMachine::new();
        let batch = TransferBatch::new("b-1", vec![TransferTask::new("t-0", "/a.pdf", "a.pdf")]);
        machine.begin(batch.clone()).unwrap();

        let err = machine.complete(&batch).unwrap_err();
        assert_eq!(err, StateError::NotSettled { completed: 0, total: 1 });
        assert_eq!(machine.current().phase(), Phase::InProgress);
    }

    #[test]
    fn test_rejects_second_active_batch_and_reset_while_running() {
        let machine = TransferStateMachine::new();
        let batch = TransferBatch::new("b-1", vec![]);
        machine.begin(batch).unwrap();

        assert!(machine.begin(TransferBatch::new("b-2", vec![])).is_err());
        assert!(matches!(
            machine.update(TransferBatch::new("b-2", vec![])),
            Err(StateError::BatchMismatch { .. })
        ));
        assert!(machine.reset().is_err());
    }

    #[tokio::test]
    async fn test_subscribers_see_whole_snapshots() {
        let machine = TransferStateMachine::new();
        let mut rx = machine.subscribe();

        machine
            .begin(TransferBatch::new("b-1", vec![TransferTask::new("t-0", "/a.pdf", "a.pdf")]))
            .unwrap();
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().snapshot();
        assert_eq!(snapshot.phase, Phase::InProgress);
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(snapshot.completed_count, 0);
    }

    #[test]
    fn test_summary_messages() {
        let mut summary = BatchSummary::from_batch(&settled_batch("b-1"));
        assert_eq!(summary.message(), "Uploaded 1 of 1 file(s)");

        summary.success_count = 0;
        summary.duplicate_count = 1;
        assert_eq!(summary.message(), "All 1 file(s) were already uploaded");

        summary.duplicate_count = 0;
        summary.failure_count = 1;
        assert!(summary.message().starts_with("All 1 upload(s) failed"));

        summary.total_count = 3;
        summary.success_count = 1;
        summary.duplicate_count = 1;
        assert_eq!(
            summary.message(),
            "Uploaded 1 of 3 file(s), 1 already uploaded, 1 failed and can be retried"
        );
    }
}
