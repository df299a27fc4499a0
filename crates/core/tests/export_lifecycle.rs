//! Export lifecycle integration tests.
//!
//! These tests run the download packager against the mock repository and
//! mock sink:
//! - Mixed outcomes (packaged, no file, download failed)
//! - Archive contents and naming
//! - Sink behavior when nothing can be packaged or the sink fails

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use zip::result::ZipError;
use zip::ZipArchive;

use invoicer_core::{
    export::{ArchiveEncoder, ExportError},
    testing::{fixtures, MockInvoiceRepository, MockSink},
    DownloadPackager, ExportConfig,
};

struct TestHarness {
    packager: DownloadPackager,
    repository: Arc<MockInvoiceRepository>,
    sink: Arc<MockSink>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(ExportConfig::default().with_delays(0, 0))
    }

    fn with_config(config: ExportConfig) -> Self {
        let repository = Arc::new(MockInvoiceRepository::new());
        let sink = Arc::new(MockSink::new());
        let packager = DownloadPackager::new(repository.clone(), sink.clone(), config)
            .expect("Failed to create packager");
        Self {
            packager,
            repository,
            sink,
        }
    }

    async fn seed(&self, id: &str, bytes: Option<&[u8]>) {
        self.repository
            .add_invoice(fixtures::invoice(id), bytes.map(<[u8]>::to_vec))
            .await;
    }
}

/// Encoder that always fails, as if the archive could not be written.
struct BrokenEncoder;

impl ArchiveEncoder for BrokenEncoder {
    fn encode(&self, _entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ZipError> {
        Err(ZipError::Io(std::io::Error::other("encoder out of space")))
    }
}

fn entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

#[tokio::test]
async fn test_mixed_outcomes_package_single_entry() {
    let harness = TestHarness::new();
    harness.seed("A", Some(b"%PDF-A")).await;
    harness.seed("B", None).await;
    harness.seed("C", Some(b"%PDF-C")).await;
    // Fails on the first attempt and on the packager's own retry.
    harness.repository.fail_downloads("C", 2).await;

    let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
    let result = harness.packager.export_batch(&ids).await.unwrap();

    assert_eq!(result.success_count, 1);
    assert_eq!(result.no_file_count, 1);
    assert_eq!(result.download_fail_count, 1);
    assert_eq!(result.no_file_ids, vec!["B".to_string()]);
    assert_eq!(result.failures[0].invoice_id, "C");

    let deliveries = harness.sink.recorded_deliveries().await;
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].name.starts_with("invoices_"));
    assert!(deliveries[0].name.ends_with(".zip"));

    let names = entry_names(&deliveries[0].bytes);
    assert_eq!(names, vec!["NO-A_ACME Corp.pdf"]);

    let mut archive = ZipArchive::new(Cursor::new(deliveries[0].bytes.clone())).unwrap();
    let mut content = Vec::new();
    archive.by_index(0).unwrap().read_to_end(&mut content).unwrap();
    assert_eq!(content, b"%PDF-A");
}

#[tokio::test]
async fn test_transient_download_failure_recovered_by_retry() {
    let harness = TestHarness::new();
    harness.seed("A", Some(b"%PDF-A")).await;
    harness.repository.fail_downloads("A", 1).await;

    let result = harness
        .packager
        .export_batch(&["A".to_string()])
        .await
        .unwrap();

    assert_eq!(result.success_count, 1);
    assert_eq!(result.download_fail_count, 0);
    assert_eq!(harness.repository.recorded_downloads().await.len(), 2);
}

#[tokio::test]
async fn test_nothing_to_package_skips_sink() {
    let harness = TestHarness::new();
    harness.seed("A", None).await;
    harness.seed("B", None).await;

    let result = harness
        .packager
        .export_batch(&["A".to_string(), "B".to_string()])
        .await
        .unwrap();

    assert_eq!(result.success_count, 0);
    assert!(result.archive_bytes.is_none());
    assert_eq!(
        result.failure_message().unwrap(),
        "None of the 2 selected invoice(s) has an attached file"
    );
    assert_eq!(harness.sink.delivery_count().await, 0);
}

#[tokio::test]
async fn test_unknown_ids_count_as_download_failures() {
    let harness = TestHarness::new();
    let result = harness
        .packager
        .export_batch(&["ghost".to_string()])
        .await
        .unwrap();

    assert_eq!(result.download_fail_count, 1);
    assert_eq!(result.failures[0].reason, "Invoice not found");
    assert!(result
        .failure_message()
        .unwrap()
        .starts_with("Downloading failed for all 1"));
}

#[tokio::test]
async fn test_sink_failure_is_reported() {
    let harness = TestHarness::new();
    harness.seed("A", Some(b"%PDF-A")).await;
    harness.sink.set_fail(true).await;

    let err = harness
        .packager
        .export_batch(&["A".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Sink(_)));
}

#[tokio::test]
async fn test_packaging_failure_is_fatal_and_skips_sink() {
    let repository = Arc::new(MockInvoiceRepository::new());
    let sink = Arc::new(MockSink::new());
    let packager = DownloadPackager::new(
        repository.clone(),
        sink.clone(),
        ExportConfig::default().with_delays(0, 0),
    )
    .expect("Failed to create packager")
    .with_encoder(Arc::new(BrokenEncoder));

    repository
        .add_invoice(fixtures::invoice("A"), Some(b"%PDF-A".to_vec()))
        .await;
    repository
        .add_invoice(fixtures::invoice("B"), Some(b"%PDF-B".to_vec()))
        .await;

    let err = packager
        .export_batch(&["A".to_string(), "B".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Packaging(_)));
    assert_eq!(sink.delivery_count().await, 0);
}

#[tokio::test]
async fn test_downloads_bounded_by_wave_size() {
    let harness = TestHarness::with_config(
        ExportConfig::default()
            .with_max_concurrency(2)
            .with_delays(10, 0),
    );
    harness.repository.set_latency(Duration::from_millis(15));
    for i in 0..5 {
        harness
            .seed(&format!("inv-{}", i), Some(format!("%PDF-{}", i).as_bytes()))
            .await;
    }

    let ids: Vec<String> = (0..5).map(|i| format!("inv-{}", i)).collect();
    let result = harness.packager.export_batch(&ids).await.unwrap();

    assert_eq!(result.success_count, 5);
    assert!(harness.repository.max_concurrent() <= 2);

    let names = entry_names(result.archive_bytes.as_deref().unwrap());
    assert_eq!(names.len(), 5);
    assert_eq!(names[0], "NO-inv-0_ACME Corp.pdf");
    assert_eq!(names[4], "NO-inv-4_ACME Corp.pdf");
}
