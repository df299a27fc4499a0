//! Mock invoice repository for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::repository::{Invoice, InvoiceId, InvoiceRepository, InvoiceStatus, RepositoryError};

/// Scripted result of one `create` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    Duplicate(Option<InvoiceId>),
    Network,
    Timeout,
    Rejected(String),
    /// The worker panics mid-upload.
    Panic,
}

impl MockOutcome {
    fn into_error(self) -> Option<RepositoryError> {
        match self {
            MockOutcome::Succeed | MockOutcome::Panic => None,
            MockOutcome::Duplicate(existing_id) => Some(RepositoryError::Duplicate { existing_id }),
            MockOutcome::Network => Some(RepositoryError::Network("connection reset".to_string())),
            MockOutcome::Timeout => Some(RepositoryError::Timeout("30s".to_string())),
            MockOutcome::Rejected(reason) => Some(RepositoryError::Rejected(reason)),
        }
    }
}

/// A recorded `create` call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCreate {
    pub file: PathBuf,
    /// Invoice id when the call succeeded.
    pub invoice_id: Option<InvoiceId>,
}

#[derive(Debug, Default)]
struct MockState {
    invoices: HashMap<InvoiceId, Invoice>,
    bytes: HashMap<InvoiceId, Vec<u8>>,
    /// Scripted outcomes per file name, consumed in order.
    outcomes: HashMap<String, VecDeque<MockOutcome>>,
    /// Remaining forced download failures per invoice.
    download_failures: HashMap<InvoiceId, usize>,
    next_error: Option<MockOutcome>,
    creates: Vec<RecordedCreate>,
    downloads: Vec<InvoiceId>,
    deleted: Vec<InvoiceId>,
}

/// Mock implementation of the InvoiceRepository trait.
///
/// Provides controllable behavior for testing:
/// - Script per-file upload outcomes (success, duplicate, failures, panics)
/// - Simulate latency and observe the peak number of concurrent calls
/// - Seed invoices with or without downloadable bytes
/// - Force download failures per invoice
///
/// # Example
///
/// ```rust,ignore
/// use invoicer_core::testing::{MockInvoiceRepository, MockOutcome};
///
/// let repo = MockInvoiceRepository::new();
/// repo.push_outcome("b.pdf", MockOutcome::Network).await;
/// repo.set_latency(Duration::from_millis(20));
///
/// // ... run a batch ...
/// assert!(repo.max_concurrent() <= 3);
/// ```
#[derive(Debug)]
pub struct MockInvoiceRepository {
    state: Arc<RwLock<MockState>>,
    latency_ms: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    counter: AtomicUsize,
}

impl Default for MockInvoiceRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when a call ends, even by panic.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockInvoiceRepository {
    /// Create a new mock repository with no latency.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            latency_ms: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
        }
    }

    /// Delay applied to every upload and download.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    /// Queue an outcome for the next upload of a file with this name.
    pub async fn push_outcome(&self, file_name: &str, outcome: MockOutcome) {
        self.state
            .write()
            .await
            .outcomes
            .entry(file_name.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Configure the next upload, whatever the file, to end with `outcome`.
    pub async fn set_next_error(&self, outcome: MockOutcome) {
        self.state.write().await.next_error = Some(outcome);
    }

    /// Seed an invoice. `bytes` of `None` leaves it without a file.
    pub async fn add_invoice(&self, mut invoice: Invoice, bytes: Option<Vec<u8>>) {
        let mut state = self.state.write().await;
        match bytes {
            Some(bytes) => {
                invoice.file_ref = Some(format!("mock/{}.pdf", invoice.id));
                state.bytes.insert(invoice.id.clone(), bytes);
            }
            None => invoice.file_ref = None,
        }
        state.invoices.insert(invoice.id.clone(), invoice);
    }

    /// Make the next `times` downloads of `id` fail with a network error.
    pub async fn fail_downloads(&self, id: &str, times: usize) {
        self.state
            .write()
            .await
            .download_failures
            .insert(id.to_string(), times);
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub async fn recorded_creates(&self) -> Vec<RecordedCreate> {
        self.state.read().await.creates.clone()
    }

    /// Number of `create` calls for a file name.
    pub async fn create_count(&self, file_name: &str) -> usize {
        self.state
            .read()
            .await
            .creates
            .iter()
            .filter(|c| file_name_of(&c.file) == file_name)
            .count()
    }

    /// Invoice ids passed to `get_pdf_bytes`, in call order.
    pub async fn recorded_downloads(&self) -> Vec<InvoiceId> {
        self.state.read().await.downloads.clone()
    }

    pub async fn recorded_deletes(&self) -> Vec<InvoiceId> {
        self.state.read().await.deleted.clone()
    }

    pub async fn invoice(&self, id: &str) -> Option<Invoice> {
        self.state.read().await.invoices.get(id).cloned()
    }

    fn enter(&self) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(&self.active)
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }
    }

    async fn take_outcome(&self, file_name: &str) -> MockOutcome {
        let mut state = self.state.write().await;
        if let Some(outcome) = state.next_error.take() {
            return outcome;
        }
        state
            .outcomes
            .get_mut(file_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockOutcome::Succeed)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl InvoiceRepository for MockInvoiceRepository {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, file: &Path) -> Result<InvoiceId, RepositoryError> {
        let (tx, _rx) = mpsc::channel(1);
        self.create_with_progress(file, tx).await
    }

    async fn create_with_progress(
        &self,
        file: &Path,
        progress_tx: mpsc::Sender<u8>,
    ) -> Result<InvoiceId, RepositoryError> {
        let _guard = self.enter();
        let file_name = file_name_of(file);
        let outcome = self.take_outcome(&file_name).await;

        let _ = progress_tx.try_send(10);
        self.simulate_latency().await;

        if outcome == MockOutcome::Panic {
            panic!("mock upload of {} panicked", file_name);
        }

        let result = match outcome.into_error() {
            Some(err) => Err(err),
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                let id = format!("mock-inv-{}", n);
                let invoice = Invoice {
                    id: id.clone(),
                    invoice_number: file.file_stem().map(|s| s.to_string_lossy().to_string()),
                    seller_name: None,
                    amount_cents: 0,
                    status: InvoiceStatus::Processing,
                    file_ref: Some(format!("mock/{}.pdf", id)),
                    file_name: file_name.clone(),
                    set_id: None,
                    created_at: chrono::Utc::now(),
                };
                let mut state = self.state.write().await;
                state.bytes.insert(id.clone(), b"%PDF-mock".to_vec());
                state.invoices.insert(id.clone(), invoice);
                Ok(id)
            }
        };

        if result.is_ok() {
            let _ = progress_tx.try_send(100);
        }
        self.state.write().await.creates.push(RecordedCreate {
            file: file.to_path_buf(),
            invoice_id: result.as_ref().ok().cloned(),
        });
        result
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Invoice>, RepositoryError> {
        Ok(self.state.read().await.invoices.get(id).cloned())
    }

    async fn get_pdf_bytes(&self, invoice: &Invoice) -> Result<Vec<u8>, RepositoryError> {
        let _guard = self.enter();
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        state.downloads.push(invoice.id.clone());
        if let Some(remaining) = state.download_failures.get_mut(&invoice.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RepositoryError::Network(format!(
                    "download of {} interrupted",
                    invoice.id
                )));
            }
        }
        state
            .bytes
            .get(&invoice.id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("file of invoice {}", invoice.id)))
    }

    async fn update_status(
        &self,
        id: &str,
        status: InvoiceStatus,
    ) -> Result<InvoiceStatus, RepositoryError> {
        let mut state = self.state.write().await;
        let invoice = state
            .invoices
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", id)))?;
        Ok(std::mem::replace(&mut invoice.status, status))
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .invoices
            .remove(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", id)))?;
        state.bytes.remove(id);
        state.deleted.push(id.to_string());
        Ok(())
    }
}
