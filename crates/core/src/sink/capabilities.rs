//! Startup selection of the sink strategy.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::config::{SinkConfig, SinkMode};
use super::revealer::{CommandRevealer, NoopRevealer};
use super::save::PersistentSaveSink;
use super::share::TransientShareSink;
use super::traits::{FileRevealer, PlatformSink};

/// What the host platform can do with an exported archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkCapabilities {
    /// A system share target exists.
    pub can_share: bool,
    /// The user can browse a persistent downloads location.
    pub can_save: bool,
}

impl SinkCapabilities {
    /// Capabilities of the platform this binary was built for.
    pub fn detect() -> Self {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            Self {
                can_share: true,
                can_save: false,
            }
        } else {
            Self {
                can_share: false,
                can_save: true,
            }
        }
    }

    /// Whether `Auto` resolves to the share sink.
    pub fn prefers_share(&self) -> bool {
        self.can_share && !self.can_save
    }
}

/// Build the sink once at startup.
pub fn select_sink(capabilities: SinkCapabilities, config: &SinkConfig) -> Arc<dyn PlatformSink> {
    let revealer: Arc<dyn FileRevealer> = match &config.reveal_command {
        Some(program) if !program.trim().is_empty() => Arc::new(CommandRevealer::new(program.trim())),
        _ => Arc::new(NoopRevealer),
    };

    let share = match config.mode {
        SinkMode::Share => true,
        SinkMode::Save => false,
        SinkMode::Auto => capabilities.prefers_share(),
    };

    if share {
        let scratch = std::env::temp_dir().join("invoicer-share");
        info!(
            "Exports are shared from {} (grace {}s)",
            scratch.display(),
            config.share_grace_secs
        );
        Arc::new(TransientShareSink::new(
            scratch,
            Duration::from_secs(config.share_grace_secs),
            revealer,
        ))
    } else {
        let dir = config.resolved_download_dir();
        info!("Exports are saved to {}", dir.display());
        Arc::new(PersistentSaveSink::new(dir, revealer))
    }
}
