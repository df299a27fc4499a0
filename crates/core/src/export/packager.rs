//! Batch export driver.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archive::{entry_base_name, ArchiveEncoder, EntryNamer, ZipEncoder};
use super::config::ExportConfig;
use super::types::{ExportError, ExportFailure, ExportProgress, PackageResult};
use crate::limiter::{ConcurrencyLimiter, LimiterOutcome};
use crate::metrics::{EXPORT_ARCHIVE_BYTES, EXPORT_FILES, EXPORT_PACKAGING_FAILURES};
use crate::repository::{Invoice, InvoiceId, InvoiceRepository, RepositoryError};
use crate::sink::PlatformSink;

/// A downloaded file waiting to be packaged.
struct Fetched {
    position: usize,
    invoice: Invoice,
    bytes: Vec<u8>,
}

/// Result of one fetch worker.
struct FetchOutcome {
    position: usize,
    invoice: Invoice,
    result: Result<Vec<u8>, RepositoryError>,
}

/// Exports invoice files as a single archive handed to a [`PlatformSink`].
pub struct DownloadPackager {
    repository: Arc<dyn InvoiceRepository>,
    sink: Arc<dyn PlatformSink>,
    config: ExportConfig,
    limiter: ConcurrencyLimiter,
    encoder: Arc<dyn ArchiveEncoder>,
}

impl DownloadPackager {
    pub fn new(
        repository: Arc<dyn InvoiceRepository>,
        sink: Arc<dyn PlatformSink>,
        config: ExportConfig,
    ) -> Result<Self, ExportError> {
        let limiter = ConcurrencyLimiter::new(config.max_concurrency)?;
        Ok(Self {
            repository,
            sink,
            config,
            limiter,
            encoder: Arc::new(ZipEncoder),
        })
    }

    /// Replace the archive encoder.
    pub fn with_encoder(mut self, encoder: Arc<dyn ArchiveEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub async fn export_batch(&self, ids: &[InvoiceId]) -> Result<PackageResult, ExportError> {
        self.export_batch_with_progress(ids, None).await
    }

    /// Export `ids`, reporting fetch progress on `progress`.
    ///
    /// Invoices without a file and files that cannot be downloaded are
    /// counted, not fatal. When nothing could be fetched the result carries
    /// no archive and the sink is not called. An archive encoding failure
    /// aborts the whole export before anything reaches the sink.
    pub async fn export_batch_with_progress(
        &self,
        ids: &[InvoiceId],
        progress: Option<mpsc::Sender<ExportProgress>>,
    ) -> Result<PackageResult, ExportError> {
        if ids.is_empty() {
            return Err(ExportError::EmptySelection);
        }
        info!("Exporting {} invoice(s)", ids.len());

        let mut result = PackageResult::default();
        let mut failures: Vec<(usize, ExportFailure)> = Vec::new();
        let mut to_fetch: Vec<(usize, Invoice)> = Vec::new();

        for (position, resolved) in self.resolve(ids).await.into_iter().enumerate() {
            match resolved {
                Ok(invoice) if invoice.has_file() => to_fetch.push((position, invoice)),
                Ok(invoice) => {
                    debug!("Invoice {} has no file", invoice.id);
                    result.no_file_count += 1;
                    result.no_file_ids.push(invoice.id);
                }
                Err(failure) => failures.push((position, failure)),
            }
        }

        let mut fetched = self.fetch_all(to_fetch, &mut failures, progress).await;

        fetched.sort_by_key(|f| f.position);
        failures.sort_by_key(|(position, _)| *position);
        result.download_fail_count = failures.len();
        result.failures = failures.into_iter().map(|(_, f)| f).collect();

        let mut namer = EntryNamer::new();
        let entries: Vec<(String, Vec<u8>)> = fetched
            .into_iter()
            .map(|f| (namer.unique(&entry_base_name(&f.invoice)), f.bytes))
            .collect();
        result.success_count = entries.len();
        result.entries = entries.iter().map(|(name, _)| name.clone()).collect();

        EXPORT_FILES
            .with_label_values(&["no_file"])
            .inc_by(result.no_file_count as u64);
        EXPORT_FILES
            .with_label_values(&["download_failed"])
            .inc_by(result.download_fail_count as u64);

        if entries.is_empty() {
            warn!(
                "Export produced no archive: {}",
                result.failure_message().unwrap_or_default()
            );
            return Ok(result);
        }

        let encoder = Arc::clone(&self.encoder);
        let archive = tokio::task::spawn_blocking(move || encoder.encode(&entries))
            .await
            .map_err(|e| ExportError::Packaging(e.to_string()))?
            .map_err(|e| {
                EXPORT_PACKAGING_FAILURES.inc();
                error!("Failed to encode export archive: {}", e);
                ExportError::Packaging(e.to_string())
            })?;

        let archive_name = format!(
            "{}_{}.zip",
            self.config.archive_prefix,
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let sink_result = self.sink.save_or_share(&archive, &archive_name).await?;

        EXPORT_FILES
            .with_label_values(&["packaged"])
            .inc_by(result.success_count as u64);
        EXPORT_ARCHIVE_BYTES
            .with_label_values(&[])
            .observe(archive.len() as f64);
        info!(
            "Exported {} file(s) to {} via {} ({} without file, {} failed)",
            result.success_count,
            archive_name,
            self.sink.name(),
            result.no_file_count,
            result.download_fail_count
        );

        result.archive_name = Some(archive_name);
        result.archive_bytes = Some(archive);
        result.sink = Some(sink_result);
        Ok(result)
    }

    /// Resolve ids to records, keeping request order.
    async fn resolve(&self, ids: &[InvoiceId]) -> Vec<Result<Invoice, ExportFailure>> {
        stream::iter(ids.iter().cloned())
            .map(|id| {
                let repository = Arc::clone(&self.repository);
                async move {
                    match repository.get_by_id(&id).await {
                        Ok(Some(invoice)) => Ok(invoice),
                        Ok(None) => Err(ExportFailure {
                            invoice_id: id,
                            reason: "Invoice not found".to_string(),
                        }),
                        Err(e) => Err(ExportFailure {
                            invoice_id: id,
                            reason: e.to_string(),
                        }),
                    }
                }
            })
            .buffered(self.limiter.max_concurrency())
            .collect()
            .await
    }

    /// Download files in waves of `max_concurrency` with a pause in between.
    async fn fetch_all(
        &self,
        mut remaining: Vec<(usize, Invoice)>,
        failures: &mut Vec<(usize, ExportFailure)>,
        progress: Option<mpsc::Sender<ExportProgress>>,
    ) -> Vec<Fetched> {
        let total = remaining.len();
        let wave_size = self.limiter.max_concurrency();
        let mut fetched = Vec::with_capacity(total);
        let mut failed = 0usize;
        let mut first_wave = true;

        while !remaining.is_empty() {
            let rest = remaining.split_off(wave_size.min(remaining.len()));
            let wave = std::mem::replace(&mut remaining, rest);

            if !first_wave && self.config.wave_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.wave_delay_ms)).await;
            }
            first_wave = false;

            let wave_meta: Vec<(usize, InvoiceId)> = wave
                .iter()
                .map(|(position, invoice)| (*position, invoice.id.clone()))
                .collect();

            let repository = Arc::clone(&self.repository);
            let retries = self.config.fetch_retries;
            let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
            let mut run = self.limiter.run(
                wave,
                move |(position, invoice), _token| {
                    fetch_with_retry(Arc::clone(&repository), position, invoice, retries, retry_delay)
                },
                CancellationToken::new(),
            );

            while let Some(outcome) = run.next().await {
                match outcome {
                    LimiterOutcome::Completed { output, .. } => match output.result {
                        Ok(bytes) => fetched.push(Fetched {
                            position: output.position,
                            invoice: output.invoice,
                            bytes,
                        }),
                        Err(e) => {
                            failed += 1;
                            failures.push((
                                output.position,
                                ExportFailure {
                                    invoice_id: output.invoice.id,
                                    reason: e.to_string(),
                                },
                            ));
                        }
                    },
                    LimiterOutcome::Panicked { index, message } => {
                        failed += 1;
                        let (position, invoice_id) = wave_meta[index].clone();
                        failures.push((
                            position,
                            ExportFailure {
                                invoice_id,
                                reason: format!("Internal error: {}", message),
                            },
                        ));
                    }
                    LimiterOutcome::Skipped { item: (position, invoice), .. } => {
                        failed += 1;
                        failures.push((
                            position,
                            ExportFailure {
                                invoice_id: invoice.id,
                                reason: "cancelled".to_string(),
                            },
                        ));
                    }
                }

                if let Some(tx) = &progress {
                    let _ = tx
                        .send(ExportProgress {
                            fetched: fetched.len(),
                            failed,
                            total,
                        })
                        .await;
                }
            }
        }

        fetched
    }
}

/// Fetch one file, retrying a bounded number of times after the repository
/// has given up on its own retries.
async fn fetch_with_retry(
    repository: Arc<dyn InvoiceRepository>,
    position: usize,
    invoice: Invoice,
    retries: u32,
    retry_delay: Duration,
) -> FetchOutcome {
    let mut attempt = 0u32;
    let result = loop {
        match repository.get_pdf_bytes(&invoice).await {
            Ok(bytes) => break Ok(bytes),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(
                    "Download of invoice {} failed ({}), retry {}/{}",
                    invoice.id, e, attempt, retries
                );
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => break Err(e),
        }
    };
    FetchOutcome {
        position,
        invoice,
        result,
    }
}
