//! Transient share sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::{checked_file_name, FileRevealer, PlatformSink, SinkError, SinkResult};

/// Writes the archive to scratch storage, hands it to a share target and
/// deletes it after a grace period. Nothing is persisted.
pub struct TransientShareSink {
    scratch_dir: PathBuf,
    grace: Duration,
    revealer: Arc<dyn FileRevealer>,
}

impl TransientShareSink {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        grace: Duration,
        revealer: Arc<dyn FileRevealer>,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            grace,
            revealer,
        }
    }
}

#[async_trait]
impl PlatformSink for TransientShareSink {
    fn name(&self) -> &str {
        "share"
    }

    async fn save_or_share(
        &self,
        bytes: &[u8],
        suggested_name: &str,
    ) -> Result<SinkResult, SinkError> {
        let name = checked_file_name(suggested_name)?;

        // One directory per share keeps the suggested name intact.
        let share_dir = self.scratch_dir.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&share_dir).await?;
        let path = share_dir.join(name);

        if let Err(e) = tokio::fs::write(&path, bytes).await {
            let _ = tokio::fs::remove_dir_all(&share_dir).await;
            return Err(e.into());
        }

        if let Err(e) = self.revealer.reveal(&path).await {
            let _ = tokio::fs::remove_dir_all(&share_dir).await;
            return Err(e);
        }
        info!("Shared {} ({} bytes) via {}", name, bytes.len(), self.revealer.name());

        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match tokio::fs::remove_dir_all(&share_dir).await {
                Ok(()) => debug!("Removed shared archive {}", share_dir.display()),
                Err(e) => warn!(
                    "Failed to remove shared archive {}: {}",
                    share_dir.display(),
                    e
                ),
            }
        });

        Ok(SinkResult {
            path: None,
            shared: true,
        })
    }
}
