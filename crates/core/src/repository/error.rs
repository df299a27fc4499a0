//! Error type reported by repository collaborators.

use thiserror::Error;

/// Errors surfaced by the invoice and reimbursement-set repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The file's content is already stored for this user.
    #[error("Duplicate content (existing invoice: {})", existing_id.as_deref().unwrap_or("unknown"))]
    Duplicate { existing_id: Option<String> },

    /// Connection-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Transport timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The backend refused or failed to process the file.
    #[error("Rejected by repository: {0}")]
    Rejected(String),

    /// The request itself was invalid.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepositoryError {
    /// Whether the failure is likely to go away on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RepositoryError::Network("reset".into()).is_transient());
        assert!(RepositoryError::Timeout("30s".into()).is_transient());
        assert!(!RepositoryError::Rejected("bad pdf".into()).is_transient());
        assert!(!RepositoryError::Duplicate { existing_id: None }.is_transient());
    }

    #[test]
    fn test_duplicate_display() {
        let err = RepositoryError::Duplicate {
            existing_id: Some("inv-9".to_string()),
        };
        assert_eq!(err.to_string(), "Duplicate content (existing invoice: inv-9)");
    }
}
