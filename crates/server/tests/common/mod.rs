//! Common test utilities for driving the API in-process.
//!
//! The fixture wires the real services over a `LocalRepository` in a temp
//! directory and a `MockSink`, so uploads, exports and set propagation run
//! end to end without a network or a file manager.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use invoicer_core::config::StorageConfig;
use invoicer_core::{
    testing::MockSink, Config, DownloadPackager, EventBus, ExportConfig, InvoiceService,
    LocalRepository, ReimbursementSetAggregate, ReimbursementSetService, UploadConfig,
    UploadOrchestrator,
};
use invoicer_server::api::WsBroadcaster;
use invoicer_server::state::AppState;

/// Re-export fixtures for test convenience
pub use invoicer_core::testing::fixtures;

/// Test fixture with an in-process router.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() {
///     let fixture = TestFixture::new().await;
///     let response = fixture.get("/api/v1/health").await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Backend shared by every service
    pub repository: Arc<LocalRepository>,
    /// Records exported archives
    pub sink: Arc<MockSink>,
    pub state: Arc<AppState>,
    /// Directory for files to upload
    pub files_dir: PathBuf,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default limits.
    pub async fn new() -> Self {
        Self::with_upload_config(UploadConfig::default()).await
    }

    pub async fn with_upload_config(upload: UploadConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = temp_dir.path().join("store");
        let files_dir = temp_dir.path().join("files");
        std::fs::create_dir_all(&files_dir).expect("Failed to create files dir");

        let config = Config {
            upload: upload.clone(),
            export: ExportConfig::default().with_delays(0, 0),
            storage: StorageConfig {
                root: store.clone(),
            },
            ..Default::default()
        };

        let repository =
            Arc::new(LocalRepository::new(&store).expect("Failed to create repository"));
        let bus = EventBus::new(64);
        let sink = Arc::new(MockSink::new());

        let uploads = Arc::new(
            UploadOrchestrator::new(repository.clone(), bus.clone(), upload)
                .expect("Failed to create orchestrator"),
        );
        let exports = Arc::new(
            DownloadPackager::new(repository.clone(), sink.clone(), config.export.clone())
                .expect("Failed to create packager"),
        );
        let invoices = InvoiceService::new(repository.clone(), bus.clone());
        let sets = ReimbursementSetService::new(repository.clone(), bus.clone());

        let set_aggregate = Arc::new(ReimbursementSetAggregate::new(repository.clone()));
        // Dropping the subscription leaves the handler attached.
        let _ = ReimbursementSetAggregate::attach(&set_aggregate, &bus);

        let ws_broadcaster = WsBroadcaster::default();

        let state = Arc::new(AppState::new(
            config,
            uploads,
            exports,
            invoices,
            sets,
            set_aggregate,
            bus,
            ws_broadcaster,
        ));
        let router = invoicer_server::api::create_router(state.clone());

        Self {
            router,
            repository,
            sink,
            state,
            files_dir,
            temp_dir,
        }
    }

    /// Write a PDF-looking file to upload and return its path as JSON.
    pub fn pdf(&self, name: &str) -> Value {
        let path = fixtures::pdf_file(&self.files_dir, name, 64);
        Value::String(path.to_string_lossy().to_string())
    }

    /// Seed an invoice directly in the backend.
    pub async fn seed_invoice(&self, id: &str, content: Option<&[u8]>) {
        self.repository
            .insert(fixtures::invoice(id), content)
            .await
            .expect("Failed to seed invoice");
    }

    /// Poll `GET /uploads` until the batch reports `completed`.
    pub async fn wait_for_upload(&self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let response = self.get("/api/v1/uploads").await;
                if response.body["phase"] == "completed" {
                    return response.body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for upload batch")
    }

    /// Wait until the set aggregate has reloaded at least `count` times.
    pub async fn wait_for_sets(&self, count: u64) {
        let mut revisions = self.state.set_aggregate().revisions();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *revisions.borrow_and_update() < count {
                revisions.changed().await.expect("aggregate dropped");
            }
        })
        .await
        .expect("Timed out waiting for set aggregate");
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        TestResponse {
            status,
            body: parse_body(&bytes),
        }
    }

    /// Send a GET request and return the body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        let (status, bytes) = self.send(request).await;
        TestResponse {
            status,
            body: parse_body(&bytes),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, body_bytes.to_vec())
    }
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(bytes).unwrap_or(Value::Null)
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
