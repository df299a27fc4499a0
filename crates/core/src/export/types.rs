use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limiter::LimiterError;
use crate::repository::InvoiceId;
use crate::sink::{SinkError, SinkResult};

/// Fetch progress of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub fetched: usize,
    pub failed: usize,
    /// Invoices that have a file to fetch.
    pub total: usize,
}

/// Why one invoice did not make it into the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFailure {
    pub invoice_id: InvoiceId,
    pub reason: String,
}

/// Outcome of an export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageResult {
    pub success_count: usize,
    /// Invoices without a file reference.
    pub no_file_count: usize,
    /// Invoices that could not be resolved or downloaded.
    pub download_fail_count: usize,
    /// Entry names in request order.
    pub entries: Vec<String>,
    pub no_file_ids: Vec<InvoiceId>,
    pub failures: Vec<ExportFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_name: Option<String>,
    /// Encoded archive. Absent when nothing was packaged.
    #[serde(skip)]
    pub archive_bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink: Option<SinkResult>,
}

impl PackageResult {
    pub fn requested_count(&self) -> usize {
        self.success_count + self.no_file_count + self.download_fail_count
    }

    pub fn archive_size(&self) -> Option<usize> {
        self.archive_bytes.as_ref().map(Vec::len)
    }

    /// Explanation for an export that produced no archive.
    pub fn failure_message(&self) -> Option<String> {
        if self.archive_bytes.is_some() {
            return None;
        }
        let message = match (self.no_file_count, self.download_fail_count) {
            (0, 0) => "Nothing to export".to_string(),
            (n, 0) => format!(
                "None of the {} selected invoice(s) has an attached file",
                n
            ),
            (0, n) => format!(
                "Downloading failed for all {} invoice(s); check your connection and try again",
                n
            ),
            (missing, failed) => format!(
                "Nothing to export: {} invoice(s) have no attached file and {} download(s) failed",
                missing, failed
            ),
        };
        Some(message)
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No invoices selected")]
    EmptySelection,

    /// Archive encoding failed; nothing was written.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Limiter(#[from] LimiterError),
}
