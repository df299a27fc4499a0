//! Batch exports.
//!
//! [`DownloadPackager`] fetches invoice files through the shared
//! [`ConcurrencyLimiter`](crate::limiter::ConcurrencyLimiter), packages them
//! into one ZIP archive and hands it to the configured
//! [`PlatformSink`](crate::sink::PlatformSink).

mod archive;
mod config;
mod packager;
mod types;

pub use archive::{
    build_zip, entry_base_name, sanitize_component, ArchiveEncoder, EntryNamer, ZipEncoder,
};
pub use config::ExportConfig;
pub use packager::DownloadPackager;
pub use types::{ExportError, ExportFailure, ExportProgress, PackageResult};
