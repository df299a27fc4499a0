//! Platform sinks for export archives.
//!
//! The strategy is chosen once at startup by [`select_sink`] and injected
//! into the [`DownloadPackager`](crate::export::DownloadPackager).

mod capabilities;
mod config;
mod revealer;
mod save;
mod share;
mod traits;

pub use capabilities::{select_sink, SinkCapabilities};
pub use config::{SinkConfig, SinkMode};
pub use revealer::{CommandRevealer, NoopRevealer};
pub use save::PersistentSaveSink;
pub use share::TransientShareSink;
pub use traits::{FileRevealer, PlatformSink, SinkError, SinkResult};
