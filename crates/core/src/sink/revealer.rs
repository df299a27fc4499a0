//! File revealers.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::traits::{FileRevealer, SinkError};

/// Does nothing. Used when no reveal command is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopRevealer;

#[async_trait]
impl FileRevealer for NoopRevealer {
    fn name(&self) -> &str {
        "noop"
    }

    async fn reveal(&self, _path: &Path) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Runs a program with the file path as its last argument, e.g. `xdg-open`.
#[derive(Debug, Clone)]
pub struct CommandRevealer {
    program: String,
    args: Vec<String>,
}

impl CommandRevealer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl FileRevealer for CommandRevealer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn reveal(&self, path: &Path) -> Result<(), SinkError> {
        debug!("Revealing {} with {}", path.display(), self.program);
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .status()
            .await
            .map_err(|e| SinkError::Reveal {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SinkError::Reveal {
                path: path.to_path_buf(),
                reason: format!("{} exited with {}", self.program, status),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_revealer() {
        assert!(NoopRevealer.reveal(Path::new("/tmp/x.zip")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_program_reports_reveal_error() {
        let revealer = CommandRevealer::new("definitely-not-a-real-program-4d1f");
        let err = revealer.reveal(Path::new("/tmp/x.zip")).await.unwrap_err();
        assert!(matches!(err, SinkError::Reveal { .. }));
    }
}
