use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::limiter::LimiterError;
use crate::transfer::{BatchSummary, StateError, TaskId, TransferState};

/// Files dropped from a submission, grouped by cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitWarning {
    /// More files than the batch cap were selected; the tail was dropped.
    BatchTruncated { accepted: usize, dropped: usize },
    FileTooLarge {
        paths: Vec<PathBuf>,
        limit_bytes: u64,
    },
    UnsupportedExtension { paths: Vec<PathBuf> },
    MissingFile { paths: Vec<PathBuf> },
}

impl SubmitWarning {
    /// Number of files the warning refers to.
    pub fn file_count(&self) -> usize {
        match self {
            SubmitWarning::BatchTruncated { dropped, .. } => *dropped,
            SubmitWarning::FileTooLarge { paths, .. }
            | SubmitWarning::UnsupportedExtension { paths }
            | SubmitWarning::MissingFile { paths } => paths.len(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            SubmitWarning::BatchTruncated { accepted, dropped } => format!(
                "Only the first {} files were accepted; {} were left out",
                accepted, dropped
            ),
            SubmitWarning::FileTooLarge { paths, limit_bytes } => format!(
                "{} file(s) exceed the {} limit and were skipped",
                paths.len(),
                format_size(*limit_bytes)
            ),
            SubmitWarning::UnsupportedExtension { paths } => {
                format!("{} file(s) have an unsupported type and were skipped", paths.len())
            }
            SubmitWarning::MissingFile { paths } => {
                format!("{} file(s) could not be found and were skipped", paths.len())
            }
        }
    }
}

/// Human-readable size, e.g. `10 MB`, `1.5 MB`, `512 KB` or `100 bytes`.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    let scaled = |unit: u64, label: &str| {
        if bytes % unit == 0 {
            format!("{} {}", bytes / unit, label)
        } else {
            format!("{:.1} {}", bytes as f64 / unit as f64, label)
        }
    };
    match bytes {
        b if b >= MB => scaled(MB, "MB"),
        b if b >= KB => scaled(KB, "KB"),
        b => format!("{} bytes", b),
    }
}

/// Errors from upload commands.
///
/// Per-task failures never show up here; they are recorded on the task.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No files selected")]
    EmptySelection,

    #[error("None of the selected files can be uploaded")]
    NoValidFiles { warnings: Vec<SubmitWarning> },

    #[error("An upload batch is already in progress")]
    BatchInProgress,

    #[error("No upload batch")]
    NoActiveBatch,

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Task {task_id} is {status} and cannot be retried")]
    NotRetryable {
        task_id: TaskId,
        status: &'static str,
    },

    #[error("The batch was cancelled and cannot be resumed")]
    BatchCancelled,

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Limiter(#[from] LimiterError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Handle returned by a successful submission.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    pub batch_id: String,
    /// Task ids in submission order.
    pub task_ids: Vec<TaskId>,
    pub warnings: Vec<SubmitWarning>,
    state: watch::Receiver<TransferState>,
}

impl BatchHandle {
    pub(crate) fn new(
        batch_id: String,
        task_ids: Vec<TaskId>,
        warnings: Vec<SubmitWarning>,
        state: watch::Receiver<TransferState>,
    ) -> Self {
        Self {
            batch_id,
            task_ids,
            warnings,
            state,
        }
    }

    /// Progress stream of the orchestrator.
    pub fn progress(&self) -> watch::Receiver<TransferState> {
        self.state.clone()
    }

    /// Wait until this batch reaches `Completed`.
    ///
    /// Returns immediately if the current run has already settled.
    pub async fn wait_completed(&mut self) -> Result<Arc<BatchSummary>, UploadError> {
        loop {
            {
                let state = self.state.borrow_and_update();
                match &*state {
                    TransferState::Completed(summary) if summary.batch_id == self.batch_id => {
                        return Ok(Arc::clone(summary));
                    }
                    TransferState::Idle => return Err(UploadError::NoActiveBatch),
                    _ => {}
                }
            }
            self.state
                .changed()
                .await
                .map_err(|_| UploadError::Internal("orchestrator dropped".to_string()))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_counts_and_messages() {
        let warning = SubmitWarning::FileTooLarge {
            paths: vec![PathBuf::from("/tmp/big.pdf")],
            limit_bytes: 10 * 1024 * 1024,
        };
        assert_eq!(warning.file_count(), 1);
        assert_eq!(
            warning.message(),
            "1 file(s) exceed the 10 MB limit and were skipped"
        );

        let truncated = SubmitWarning::BatchTruncated {
            accepted: 5,
            dropped: 2,
        };
        assert_eq!(truncated.file_count(), 2);
    }

    #[test]
    fn test_size_limit_message_picks_a_fitting_unit() {
        let too_large = |limit_bytes| SubmitWarning::FileTooLarge {
            paths: vec![PathBuf::from("a.pdf")],
            limit_bytes,
        };
        assert_eq!(
            too_large(512 * 1024).message(),
            "1 file(s) exceed the 512 KB limit and were skipped"
        );
        assert_eq!(
            too_large(1536 * 1024).message(),
            "1 file(s) exceed the 1.5 MB limit and were skipped"
        );
        assert_eq!(
            too_large(100).message(),
            "1 file(s) exceed the 100 bytes limit and were skipped"
        );
    }

    #[test]
    fn test_warning_serialization() {
        let json = serde_json::to_string(&SubmitWarning::MissingFile {
            paths: vec![PathBuf::from("a.pdf")],
        })
        .unwrap();
        assert!(json.contains("\"type\":\"missing_file\""));
    }
}
