use thiserror::Error;

use super::types::{FailureKind, TaskStatus};
use crate::repository::{InvoiceId, RepositoryError};

/// Classification of a single transfer's failure.
///
/// Per-task errors are captured into [`TaskStatus`] and never escape the
/// orchestrator; only batch-level problems surface to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Invalid input caught before any network call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The content is already stored. Not a failure.
    #[error("Already uploaded")]
    Duplicate { existing_id: Option<InvoiceId> },

    /// Network or timeout error.
    #[error("Network problem: {0}")]
    Transient(String),

    /// The repository rejected the file.
    #[error("Rejected: {0}")]
    Persistent(String),

    /// Archive encoding failed.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Persistent(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Validation(_) => Some(FailureKind::Validation),
            Self::Duplicate { .. } => None,
            Self::Transient(_) => Some(FailureKind::Transient),
            Self::Persistent(_) | Self::Packaging(_) => Some(FailureKind::Persistent),
            Self::Cancelled => Some(FailureKind::Cancelled),
        }
    }

    /// Terminal task status recording this outcome.
    pub fn into_status(self) -> TaskStatus {
        match self {
            Self::Duplicate { existing_id } => TaskStatus::Duplicate { existing_id },
            Self::Cancelled => TaskStatus::cancelled(),
            other => {
                let kind = other.failure_kind().unwrap_or(FailureKind::Persistent);
                TaskStatus::Failed {
                    reason: other.to_string(),
                    kind,
                }
            }
        }
    }
}

impl From<RepositoryError> for TransferError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Duplicate { existing_id } => Self::Duplicate { existing_id },
            RepositoryError::Network(_) | RepositoryError::Timeout(_) => {
                Self::Transient(err.to_string())
            }
            RepositoryError::Validation(msg) => Self::Validation(msg),
            RepositoryError::Rejected(_) | RepositoryError::NotFound(_) | RepositoryError::Io(_) => {
                Self::Persistent(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_classification() {
        assert!(matches!(
            TransferError::from(RepositoryError::Timeout("30s".into())),
            TransferError::Transient(_)
        ));
        assert!(matches!(
            TransferError::from(RepositoryError::Network("reset".into())),
            TransferError::Transient(_)
        ));
        assert!(matches!(
            TransferError::from(RepositoryError::Rejected("corrupt".into())),
            TransferError::Persistent(_)
        ));
        assert_eq!(
            TransferError::from(RepositoryError::Duplicate {
                existing_id: Some("inv-1".into())
            }),
            TransferError::Duplicate {
                existing_id: Some("inv-1".into())
            }
        );
    }

    #[test]
    fn test_into_status() {
        let status = TransferError::Transient("reset".into()).into_status();
        assert_eq!(
            status,
            TaskStatus::Failed {
                reason: "Network problem: reset".into(),
                kind: FailureKind::Transient
            }
        );

        let dup = TransferError::Duplicate { existing_id: None }.into_status();
        assert!(matches!(dup, TaskStatus::Duplicate { .. }));
        assert!(!dup.is_failed());

        assert_eq!(TransferError::Cancelled.into_status(), TaskStatus::cancelled());
    }

    #[test]
    fn test_retryable() {
        assert!(TransferError::Transient("x".into()).is_retryable());
        assert!(TransferError::Persistent("x".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::Duplicate { existing_id: None }.is_retryable());
    }
}
