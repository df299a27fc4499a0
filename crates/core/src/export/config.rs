//! Configuration for batch exports.

use serde::{Deserialize, Serialize};

/// Export fetch pacing and archive naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Simultaneous downloads, which is also the wave size.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Pause between download waves.
    #[serde(default = "default_wave_delay_ms")]
    pub wave_delay_ms: u64,
    /// Extra attempts per file after the repository gave up.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Pause before each extra attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Archive file names start with this prefix.
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
}

fn default_max_concurrency() -> usize {
    3
}

fn default_wave_delay_ms() -> u64 {
    300
}

fn default_fetch_retries() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_archive_prefix() -> String {
    "invoices".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            wave_delay_ms: default_wave_delay_ms(),
            fetch_retries: default_fetch_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            archive_prefix: default_archive_prefix(),
        }
    }
}

impl ExportConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set both pauses at once (handy for tests).
    pub fn with_delays(mut self, wave_delay_ms: u64, retry_delay_ms: u64) -> Self {
        self.wave_delay_ms = wave_delay_ms;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = retries;
        self
    }

    pub fn with_archive_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.archive_prefix = prefix.into();
        self
    }
}
