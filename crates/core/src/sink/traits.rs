//! Sink strategy traits.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an archive ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkResult {
    /// Persisted location. `None` when the archive was only shared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Whether the archive was handed to a share target.
    pub shared: bool,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Invalid archive name: {0:?}")]
    InvalidName(String),

    #[error("Failed to hand over {path}: {reason}")]
    Reveal { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Final destination of an export archive.
#[async_trait]
pub trait PlatformSink: Send + Sync {
    /// Returns the name of this sink.
    fn name(&self) -> &str;

    /// Save or share `bytes` under `suggested_name`.
    async fn save_or_share(
        &self,
        bytes: &[u8],
        suggested_name: &str,
    ) -> Result<SinkResult, SinkError>;
}

/// Shows a file to the user: opens a file manager, a share sheet, etc.
#[async_trait]
pub trait FileRevealer: Send + Sync {
    /// Returns the name of this revealer.
    fn name(&self) -> &str;

    async fn reveal(&self, path: &Path) -> Result<(), SinkError>;
}

/// Reject names that would escape the target directory.
pub(crate) fn checked_file_name(name: &str) -> Result<&str, SinkError> {
    let plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if name.is_empty() || !plain || name.starts_with('.') {
        return Err(SinkError::InvalidName(name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_file_name() {
        assert!(checked_file_name("invoices_20240101_120000.zip").is_ok());
        assert!(checked_file_name("").is_err());
        assert!(checked_file_name("../escape.zip").is_err());
        assert!(checked_file_name("dir/name.zip").is_err());
        assert!(checked_file_name(".hidden.zip").is_err());
    }
}
