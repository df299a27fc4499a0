//! Persistent save sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::traits::{checked_file_name, FileRevealer, PlatformSink, SinkError, SinkResult};

/// Persists the archive into a directory and then reveals it.
///
/// The target name is claimed with an empty placeholder, the archive is
/// written to a private `.part` file and then renamed over the placeholder,
/// so the target never holds a partial file. Existing files are never
/// overwritten; `name.zip` becomes `name (2).zip` and so on.
pub struct PersistentSaveSink {
    dir: PathBuf,
    revealer: Arc<dyn FileRevealer>,
}

impl PersistentSaveSink {
    pub fn new(dir: impl Into<PathBuf>, revealer: Arc<dyn FileRevealer>) -> Self {
        Self {
            dir: dir.into(),
            revealer,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Claim a free name in `dir` by creating an empty placeholder there.
///
/// `create_new` makes the claim atomic, so concurrent saves under the same
/// name end up with distinct targets.
async fn reserve_target(dir: &Path, name: &str) -> Result<PathBuf, SinkError> {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let ext = path.extension().and_then(|s| s.to_str());

    let mut idx = 1usize;
    loop {
        let file_name = match (idx, ext) {
            (1, _) => name.to_string(),
            (_, Some(ext)) => format!("{} ({}).{}", stem, idx, ext),
            (_, None) => format!("{} ({})", stem, idx),
        };
        let candidate = dir.join(file_name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => idx += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

#[async_trait]
impl PlatformSink for PersistentSaveSink {
    fn name(&self) -> &str {
        "save"
    }

    async fn save_or_share(
        &self,
        bytes: &[u8],
        suggested_name: &str,
    ) -> Result<SinkResult, SinkError> {
        let name = checked_file_name(suggested_name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = reserve_target(&self.dir, name).await?;
        let mut part = target.clone().into_os_string();
        part.push(format!(".{}.part", Uuid::new_v4().simple()));
        let part = PathBuf::from(part);

        // Only the placeholder we created is ever replaced.
        let written = match tokio::fs::write(&part, bytes).await {
            Ok(()) => tokio::fs::rename(&part, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&part).await;
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e.into());
        }
        info!("Saved {} ({} bytes)", target.display(), bytes.len());

        // The archive is already safe on disk at this point.
        if let Err(e) = self.revealer.reveal(&target).await {
            warn!("{}", e);
        }

        Ok(SinkResult {
            path: Some(target),
            shared: false,
        })
    }
}
