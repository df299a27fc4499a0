//! Batch upload driver.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::SelectAll;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::UploadConfig;
use super::types::{BatchHandle, SubmitWarning, UploadError};
use crate::events::{DomainEvent, EventBus};
use crate::limiter::{ConcurrencyLimiter, LimiterOutcome};
use crate::metrics::{UPLOAD_BATCHES, UPLOAD_BATCH_DURATION, UPLOAD_RETRIES, UPLOAD_TASKS};
use crate::repository::InvoiceRepository;
use crate::transfer::{
    FailureKind, TaskStatus, TransferBatch, TransferError, TransferState, TransferStateMachine,
    TransferTask,
};

/// Message from a worker to the batch driver.
#[derive(Debug)]
enum WorkerUpdate {
    Started { index: usize },
    Progress { index: usize, percent: u8 },
    Finished { index: usize, status: TaskStatus },
}

struct RetryRequest {
    task_id: String,
    reply: oneshot::Sender<Result<(), UploadError>>,
}

/// Bookkeeping for the current batch, shared between commands and driver.
struct ActiveBatch {
    id: String,
    token: CancellationToken,
    /// Present while a driver task owns the batch.
    control: Option<mpsc::UnboundedSender<RetryRequest>>,
    /// Snapshot of the last settled run.
    settled: Option<TransferBatch>,
}

impl ActiveBatch {
    fn is_running(&self) -> bool {
        self.control.is_some()
    }
}

type RunOutcome = LimiterOutcome<(usize, PathBuf), ()>;

/// Drives batch uploads through the [`ConcurrencyLimiter`].
///
/// One batch is active at a time. While it runs, a single driver task is the
/// only writer of the batch snapshot; workers report back through a channel
/// and every accepted transition is published on the
/// [`TransferStateMachine`].
pub struct UploadOrchestrator {
    repository: Arc<dyn InvoiceRepository>,
    bus: EventBus,
    config: UploadConfig,
    limiter: ConcurrencyLimiter,
    state: TransferStateMachine,
    active: Arc<Mutex<Option<ActiveBatch>>>,
}

impl UploadOrchestrator {
    pub fn new(
        repository: Arc<dyn InvoiceRepository>,
        bus: EventBus,
        config: UploadConfig,
    ) -> Result<Self, UploadError> {
        let limiter = ConcurrencyLimiter::new(config.max_concurrency)?;
        Ok(Self {
            repository,
            bus,
            config,
            limiter,
            state: TransferStateMachine::new(),
            active: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn state_machine(&self) -> &TransferStateMachine {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> TransferState {
        self.state.current()
    }

    /// Validate `paths` and start uploading the accepted files.
    pub async fn submit(&self, paths: Vec<PathBuf>) -> Result<BatchHandle, UploadError> {
        if paths.is_empty() {
            return Err(UploadError::EmptySelection);
        }

        let mut guard = self.active.lock().await;
        if guard.as_ref().is_some_and(ActiveBatch::is_running) {
            return Err(UploadError::BatchInProgress);
        }

        let (accepted, warnings) = self.validate(paths).await;
        if accepted.is_empty() {
            return Err(UploadError::NoValidFiles { warnings });
        }

        let batch_id = Uuid::new_v4().to_string();
        let tasks: Vec<TransferTask> = accepted
            .iter()
            .map(|path| {
                TransferTask::new(
                    Uuid::new_v4().to_string(),
                    path.to_string_lossy(),
                    display_name(path),
                )
            })
            .collect();
        let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let batch = TransferBatch::new(batch_id.clone(), tasks);

        // Settled results of a previous batch are replaced.
        self.state.begin(batch.clone())?;

        let token = CancellationToken::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *guard = Some(ActiveBatch {
            id: batch_id.clone(),
            token: token.clone(),
            control: Some(control_tx),
            settled: None,
        });

        info!(
            "Submitting upload batch {} with {} file(s) ({} warning(s))",
            batch_id,
            batch.total_count(),
            warnings.len()
        );

        let indices = (0..batch.total_count()).collect();
        self.spawn_driver(batch, indices, token, control_rx);

        Ok(BatchHandle::new(
            batch_id,
            task_ids,
            warnings,
            self.state.subscribe(),
        ))
    }

    /// Stop dequeuing new tasks. In-flight uploads finish normally.
    ///
    /// Returns `false` when there is no running batch; calling it again, or
    /// after the batch settled, changes nothing.
    pub async fn cancel(&self) -> bool {
        let guard = self.active.lock().await;
        match guard.as_ref() {
            Some(active) if active.is_running() => {
                if !active.token.is_cancelled() {
                    info!("Cancelling upload batch {}", active.id);
                    active.token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Re-submit a single failed task.
    ///
    /// On a running batch the task rejoins the current run; on a settled
    /// batch a new run starts and a new `Completed` follows it.
    pub async fn retry(&self, task_id: &str) -> Result<(), UploadError> {
        let mut guard = self.active.lock().await;
        let active = guard.as_mut().ok_or(UploadError::NoActiveBatch)?;

        if let Some(control) = &active.control {
            let (reply_tx, reply_rx) = oneshot::channel();
            control
                .send(RetryRequest {
                    task_id: task_id.to_string(),
                    reply: reply_tx,
                })
                .map_err(|_| UploadError::Internal("batch driver stopped".to_string()))?;
            drop(guard);
            return reply_rx
                .await
                .map_err(|_| UploadError::Internal("batch driver stopped".to_string()))?;
        }

        let settled = active.settled.as_ref().ok_or(UploadError::NoActiveBatch)?;
        let (index, batch) = reopen_task(&settled.with_next_run(), task_id)?;

        info!(
            "Retrying task {} of batch {} (run {})",
            task_id, batch.id, batch.run
        );
        self.state.begin(batch.clone())?;
        UPLOAD_RETRIES.inc();

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        active.control = Some(control_tx);
        self.spawn_driver(batch, vec![index], active.token.clone(), control_rx);
        Ok(())
    }

    /// Discard a settled batch and return to `Idle`.
    pub async fn clear_results(&self) -> Result<(), UploadError> {
        let mut guard = self.active.lock().await;
        if guard.as_ref().is_some_and(ActiveBatch::is_running) {
            return Err(UploadError::BatchInProgress);
        }
        if let Some(active) = guard.take() {
            debug!("Clearing results of batch {}", active.id);
        }
        self.state.reset()?;
        Ok(())
    }

    async fn validate(&self, mut paths: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<SubmitWarning>) {
        let mut warnings = Vec::new();

        let cap = self.config.max_batch_size;
        if paths.len() > cap {
            let dropped = paths.split_off(cap);
            warn!(
                "Selection of {} files exceeds batch cap {}, dropping {}",
                cap + dropped.len(),
                cap,
                dropped.len()
            );
            warnings.push(SubmitWarning::BatchTruncated {
                accepted: cap,
                dropped: dropped.len(),
            });
        }

        let mut accepted = Vec::new();
        let mut missing = Vec::new();
        let mut unsupported = Vec::new();
        let mut too_large = Vec::new();

        for path in paths {
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => {
                    missing.push(path);
                    continue;
                }
            };

            let allowed = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| self.config.allows_extension(e));
            if !allowed {
                unsupported.push(path);
            } else if metadata.len() > self.config.max_file_size_bytes {
                too_large.push(path);
            } else {
                accepted.push(path);
            }
        }

        if !missing.is_empty() {
            warn!("Dropping {} missing file(s)", missing.len());
            warnings.push(SubmitWarning::MissingFile { paths: missing });
        }
        if !unsupported.is_empty() {
            warn!("Dropping {} file(s) with unsupported type", unsupported.len());
            warnings.push(SubmitWarning::UnsupportedExtension { paths: unsupported });
        }
        if !too_large.is_empty() {
            warn!(
                "Dropping {} file(s) larger than {} bytes",
                too_large.len(),
                self.config.max_file_size_bytes
            );
            warnings.push(SubmitWarning::FileTooLarge {
                paths: too_large,
                limit_bytes: self.config.max_file_size_bytes,
            });
        }

        (accepted, warnings)
    }

    fn spawn_driver(
        &self,
        batch: TransferBatch,
        indices: Vec<usize>,
        token: CancellationToken,
        control_rx: mpsc::UnboundedReceiver<RetryRequest>,
    ) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let driver = BatchDriver {
            repository: Arc::clone(&self.repository),
            bus: self.bus.clone(),
            state: self.state.clone(),
            limiter: self.limiter.clone(),
            active: Arc::clone(&self.active),
            token,
            batch,
            updates_tx,
            outstanding: 0,
            dispatched: BTreeSet::new(),
            started_at: Instant::now(),
        };
        tokio::spawn(driver.run(indices, updates_rx, control_rx));
    }
}

/// Copy of `batch` with the failed task `task_id` back in `Pending`.
fn reopen_task(batch: &TransferBatch, task_id: &str) -> Result<(usize, TransferBatch), UploadError> {
    if batch.cancellation_requested {
        return Err(UploadError::BatchCancelled);
    }
    let index = batch
        .task_index(task_id)
        .ok_or_else(|| UploadError::UnknownTask(task_id.to_string()))?;
    let status = &batch.tasks[index].status;
    if !status.is_failed() {
        return Err(UploadError::NotRetryable {
            task_id: task_id.to_string(),
            status: status.status_type(),
        });
    }
    let reopened = batch
        .with_task_status(index, TaskStatus::Pending)
        .ok_or_else(|| UploadError::Internal(format!("task {} cannot be reopened", task_id)))?;
    Ok((index, reopened))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Sole writer of one batch run.
struct BatchDriver {
    repository: Arc<dyn InvoiceRepository>,
    bus: EventBus,
    state: TransferStateMachine,
    limiter: ConcurrencyLimiter,
    active: Arc<Mutex<Option<ActiveBatch>>>,
    token: CancellationToken,
    batch: TransferBatch,
    updates_tx: mpsc::UnboundedSender<WorkerUpdate>,
    /// Dispatched items whose limiter outcome has not arrived yet.
    outstanding: usize,
    /// Task indices picked up during this run.
    dispatched: BTreeSet<usize>,
    started_at: Instant,
}

impl BatchDriver {
    async fn run(
        mut self,
        initial: Vec<usize>,
        mut updates_rx: mpsc::UnboundedReceiver<WorkerUpdate>,
        mut control_rx: mpsc::UnboundedReceiver<RetryRequest>,
    ) {
        let token = self.token.clone();
        let mut runs = SelectAll::new();
        runs.push(self.dispatch(initial));

        loop {
            if self.outstanding == 0 {
                // Settle under the lock so a concurrent retry either joins
                // this run or finds the batch settled and starts the next.
                let active = Arc::clone(&self.active);
                let mut guard = active.lock().await;
                while let Ok(request) = control_rx.try_recv() {
                    if let Some(index) = self.handle_retry(request) {
                        runs.push(self.dispatch(vec![index]));
                    }
                }
                if self.outstanding == 0 {
                    while let Ok(update) = updates_rx.try_recv() {
                        self.apply(update);
                    }
                    self.finish(&mut guard);
                    return;
                }
            }

            tokio::select! {
                biased;
                Some(update) = updates_rx.recv() => self.apply(update),
                Some(request) = control_rx.recv() => {
                    if let Some(index) = self.handle_retry(request) {
                        runs.push(self.dispatch(vec![index]));
                    }
                }
                _ = token.cancelled(), if !self.batch.cancellation_requested => {
                    self.batch = self.batch.with_cancellation();
                    self.publish();
                }
                Some((index, outcome)) = runs.next() => self.handle_outcome(index, outcome),
            }
        }
    }

    /// Hand `indices` to the limiter. Outcomes are tagged with task indices.
    fn dispatch(
        &mut self,
        indices: Vec<usize>,
    ) -> impl Stream<Item = (usize, RunOutcome)> + Unpin + Send + 'static {
        let items: Vec<(usize, PathBuf)> = indices
            .iter()
            .map(|&i| (i, PathBuf::from(&self.batch.tasks[i].source_ref)))
            .collect();
        self.outstanding += items.len();
        self.dispatched.extend(indices.iter().copied());

        let repository = Arc::clone(&self.repository);
        let updates = self.updates_tx.clone();
        let run = self.limiter.run(
            items,
            move |(index, path), token| {
                upload_one(Arc::clone(&repository), updates.clone(), index, path, token)
            },
            self.token.clone(),
        );
        run.map(move |outcome| (indices[outcome.index()], outcome))
    }

    /// Reopen the requested task; returns its index when it should be
    /// dispatched again.
    fn handle_retry(&mut self, request: RetryRequest) -> Option<usize> {
        match reopen_task(&self.batch, &request.task_id) {
            Ok((index, batch)) => {
                info!("Retrying task {} of batch {}", request.task_id, batch.id);
                UPLOAD_RETRIES.inc();
                self.batch = batch;
                self.publish();
                let _ = request.reply.send(Ok(()));
                Some(index)
            }
            Err(e) => {
                let _ = request.reply.send(Err(e));
                None
            }
        }
    }

    fn apply(&mut self, update: WorkerUpdate) {
        let (index, status) = match update {
            WorkerUpdate::Started { index } => (index, TaskStatus::InProgress { percent: 0 }),
            WorkerUpdate::Progress { index, percent } => {
                let running = self
                    .batch
                    .tasks
                    .get(index)
                    .is_some_and(|t| t.status.is_in_progress());
                if !running {
                    return;
                }
                (index, TaskStatus::InProgress { percent })
            }
            WorkerUpdate::Finished { index, status } => (index, status),
        };
        self.transition(index, status);
    }

    fn handle_outcome(&mut self, index: usize, outcome: RunOutcome) {
        self.outstanding -= 1;
        match outcome {
            LimiterOutcome::Completed { .. } => {}
            LimiterOutcome::Panicked { message, .. } => {
                error!("Upload worker for task {} panicked: {}", index, message);
                self.transition(
                    index,
                    TaskStatus::Failed {
                        reason: format!("Internal error: {}", message),
                        kind: FailureKind::Internal,
                    },
                );
            }
            LimiterOutcome::Skipped { .. } => {
                self.transition(index, TaskStatus::cancelled());
            }
        }
    }

    fn transition(&mut self, index: usize, status: TaskStatus) {
        let label = status.status_type();
        let terminal = status.is_terminal();
        match self.batch.with_task_status(index, status) {
            Some(next) => {
                if terminal {
                    UPLOAD_TASKS.with_label_values(&[label]).inc();
                    debug!(
                        "Task {} of batch {} -> {}",
                        next.tasks[index].id, next.id, label
                    );
                }
                self.batch = next;
                self.publish();
            }
            None => debug!("Ignoring {} update for task {}", label, index),
        }
    }

    fn publish(&self) {
        if let Err(e) = self.state.update(self.batch.clone()) {
            warn!("Dropping progress snapshot for batch {}: {}", self.batch.id, e);
        }
    }

    fn finish(&mut self, slot: &mut Option<ActiveBatch>) {
        if self.token.is_cancelled() && !self.batch.cancellation_requested {
            self.batch = self.batch.with_cancellation();
        }

        // Every worker has returned; anything still open never reported back.
        for index in 0..self.batch.total_count() {
            if !self.batch.tasks[index].status.is_terminal() {
                self.transition(
                    index,
                    TaskStatus::Failed {
                        reason: "Worker exited without a result".to_string(),
                        kind: FailureKind::Internal,
                    },
                );
            }
        }

        if let Some(active) = slot.as_mut().filter(|a| a.id == self.batch.id) {
            active.control = None;
            active.settled = Some(self.batch.clone());
        }

        let summary = match self.state.complete(&self.batch) {
            Ok(summary) => summary,
            Err(e) => {
                error!("Failed to complete batch {}: {}", self.batch.id, e);
                return;
            }
        };

        let invoice_ids = self
            .dispatched
            .iter()
            .filter_map(|&i| self.batch.tasks[i].invoice_id().map(str::to_string))
            .collect();
        self.bus.publish(DomainEvent::InvoicesUploaded {
            batch_id: self.batch.id.clone(),
            invoice_ids,
        });

        let result = if summary.cancelled {
            "cancelled"
        } else {
            "completed"
        };
        UPLOAD_BATCHES.with_label_values(&[result]).inc();
        UPLOAD_BATCH_DURATION
            .with_label_values(&[result])
            .observe(self.started_at.elapsed().as_secs_f64());

        info!(
            "Upload batch {} run {} {}: {}",
            summary.batch_id,
            summary.run,
            result,
            summary.message()
        );
    }
}

/// Upload a single file, reporting every step back to the driver.
async fn upload_one(
    repository: Arc<dyn InvoiceRepository>,
    updates: mpsc::UnboundedSender<WorkerUpdate>,
    index: usize,
    path: PathBuf,
    token: CancellationToken,
) {
    if token.is_cancelled() {
        let _ = updates.send(WorkerUpdate::Finished {
            index,
            status: TaskStatus::cancelled(),
        });
        return;
    }

    let _ = updates.send(WorkerUpdate::Started { index });

    let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(16);
    let upload = repository.create_with_progress(&path, progress_tx);
    let forward = async {
        while let Some(percent) = progress_rx.recv().await {
            let _ = updates.send(WorkerUpdate::Progress {
                index,
                percent: percent.min(99),
            });
        }
    };
    let (result, ()) = tokio::join!(upload, forward);

    let status = match result {
        Ok(invoice_id) => TaskStatus::Succeeded { invoice_id },
        Err(e) => {
            let err = TransferError::from(e);
            debug!("Upload of {} failed: {}", path.display(), err);
            err.into_status()
        }
    };
    let _ = updates.send(WorkerUpdate::Finished { index, status });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::LocalRepository;
    use tempfile::TempDir;

    fn write_pdf(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(size.max(bytes.len()), b'x');
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn orchestrator(store: &TempDir, config: UploadConfig) -> UploadOrchestrator {
        let repository = Arc::new(LocalRepository::new(store.path()).unwrap());
        UploadOrchestrator::new(repository, EventBus::default(), config).unwrap()
    }

    #[tokio::test]
    async fn test_empty_selection_rejected() {
        let store = TempDir::new().unwrap();
        let orchestrator = orchestrator(&store, UploadConfig::default());
        let err = orchestrator.submit(Vec::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::EmptySelection));
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_fatal() {
        let store = TempDir::new().unwrap();
        let repository = Arc::new(LocalRepository::new(store.path()).unwrap());
        let result = UploadOrchestrator::new(
            repository,
            EventBus::default(),
            UploadConfig::default().with_max_concurrency(0),
        );
        assert!(matches!(result, Err(UploadError::Limiter(_))));
    }

    #[tokio::test]
    async fn test_validation_groups_dropped_files() {
        let store = TempDir::new().unwrap();
        let files = TempDir::new().unwrap();
        let orchestrator = orchestrator(&store, UploadConfig::default().with_max_file_size(64));

        let ok = write_pdf(files.path(), "ok.pdf", 32);
        let big = write_pdf(files.path(), "big.pdf", 128);
        let image = files.path().join("scan.png");
        std::fs::write(&image, b"png").unwrap();
        let missing = files.path().join("gone.pdf");

        let (accepted, warnings) = orchestrator
            .validate(vec![ok.clone(), big.clone(), image.clone(), missing.clone()])
            .await;

        assert_eq!(accepted, vec![ok]);
        assert!(warnings.contains(&SubmitWarning::MissingFile {
            paths: vec![missing]
        }));
        assert!(warnings.contains(&SubmitWarning::UnsupportedExtension {
            paths: vec![image]
        }));
        assert!(warnings.contains(&SubmitWarning::FileTooLarge {
            paths: vec![big],
            limit_bytes: 64
        }));
    }

    #[tokio::test]
    async fn test_no_valid_files() {
        let store = TempDir::new().unwrap();
        let orchestrator = orchestrator(&store, UploadConfig::default());
        let err = orchestrator
            .submit(vec![PathBuf::from("/nonexistent/a.pdf")])
            .await
            .unwrap_err();
        match err {
            UploadError::NoValidFiles { warnings } => assert_eq!(warnings.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orchestrator.current(), TransferState::Idle);
    }

    #[tokio::test]
    async fn test_upload_against_local_repository() {
        let store = TempDir::new().unwrap();
        let files = TempDir::new().unwrap();
        let orchestrator = orchestrator(&store, UploadConfig::default());

        let a = write_pdf(files.path(), "a.pdf", 64);
        let b = write_pdf(files.path(), "b.pdf", 96);
        let copy = files.path().join("copy-of-a.pdf");
        std::fs::copy(&a, &copy).unwrap();

        let mut handle = orchestrator.submit(vec![a, b, copy]).await.unwrap();
        let summary = handle.wait_completed().await.unwrap();

        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.duplicate_count, 1);
        assert_eq!(summary.failure_count, 0);
    }

    #[tokio::test]
    async fn test_clear_results_returns_to_idle() {
        let store = TempDir::new().unwrap();
        let files = TempDir::new().unwrap();
        let orchestrator = orchestrator(&store, UploadConfig::default());

        let mut handle = orchestrator
            .submit(vec![write_pdf(files.path(), "a.pdf", 64)])
            .await
            .unwrap();
        handle.wait_completed().await.unwrap();

        orchestrator.clear_results().await.unwrap();
        assert_eq!(orchestrator.current(), TransferState::Idle);
        assert!(matches!(
            orchestrator.retry("anything").await,
            Err(UploadError::NoActiveBatch)
        ));
    }
}
