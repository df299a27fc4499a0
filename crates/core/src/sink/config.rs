//! Configuration for the export sink.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which sink strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// Decide from platform capabilities.
    #[default]
    Auto,
    Share,
    Save,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub mode: SinkMode,
    /// Target of the save sink. Defaults to `~/Downloads`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    /// How long shared archives stay on disk.
    #[serde(default = "default_share_grace_secs")]
    pub share_grace_secs: u64,
    /// Program run with the archive path after saving or for sharing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal_command: Option<String>,
}

fn default_share_grace_secs() -> u64 {
    120
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            mode: SinkMode::default(),
            download_dir: None,
            share_grace_secs: default_share_grace_secs(),
            reveal_command: None,
        }
    }
}

impl SinkConfig {
    pub fn with_mode(mut self, mode: SinkMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Configured download directory, or `$HOME/Downloads`, or the system
    /// temp directory.
    pub fn resolved_download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) if !home.is_empty() => PathBuf::from(home).join("Downloads"),
            _ => std::env::temp_dir(),
        }
    }
}
