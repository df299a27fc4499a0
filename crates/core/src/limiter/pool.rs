use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{LimiterError, LimiterOutcome, LimiterStatus};

/// Tracks statistics for the pool.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_processed: AtomicU64,
    total_panicked: AtomicU64,
    total_skipped: AtomicU64,
}

impl PoolStats {
    fn to_status(&self, max_concurrent: usize) -> LimiterStatus {
        LimiterStatus {
            active: self.active.load(Ordering::Relaxed) as usize,
            max_concurrent,
            queued: self.queued.load(Ordering::Relaxed) as usize,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_panicked: self.total_panicked.load(Ordering::Relaxed),
            total_skipped: self.total_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Bounded worker pool.
///
/// Every [`run`](Self::run) started from the same limiter shares its slots, so
/// the bound holds across concurrent runs as well as within one.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("max_concurrency", &self.max_concurrency)
            .field("available", &self.semaphore.available_permits())
            .finish()
    }
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrency: usize) -> Result<Self, LimiterError> {
        if max_concurrency == 0 {
            return Err(LimiterError::InvalidConcurrency(max_concurrency));
        }
        Ok(Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            stats: Arc::new(PoolStats::default()),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn status(&self) -> LimiterStatus {
        self.stats.to_status(self.max_concurrency)
    }

    /// Run `items` through `worker`.
    ///
    /// Items are dequeued in submission order. Before each dequeue the token
    /// is checked; once it is cancelled the remaining items come back as
    /// [`LimiterOutcome::Skipped`] while running workers finish normally. The
    /// worker receives a clone of the token so it can check it again before
    /// expensive steps.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        worker: F,
        cancel: CancellationToken,
    ) -> LimiterRun<T, R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::clone(&self.semaphore);
        let stats = Arc::clone(&self.stats);
        let worker = Arc::new(worker);

        stats.queued.fetch_add(total as u64, Ordering::Relaxed);

        tokio::spawn(async move {
            for (index, item) in items.into_iter().enumerate() {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                };

                // A slot may free up in the same instant the token fires.
                let permit = match permit {
                    Some(permit) if !cancel.is_cancelled() => permit,
                    _ => {
                        stats.queued.fetch_sub(1, Ordering::Relaxed);
                        stats.total_skipped.fetch_add(1, Ordering::Relaxed);
                        debug!("Skipping item {} after cancellation", index);
                        let _ = tx.send(LimiterOutcome::Skipped { index, item });
                        continue;
                    }
                };

                stats.queued.fetch_sub(1, Ordering::Relaxed);
                stats.active.fetch_add(1, Ordering::Relaxed);

                let fut = (*worker)(item, cancel.clone());
                let tx = tx.clone();
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    // Inner task so a panicking worker surfaces as a JoinError
                    // instead of tearing down the slot bookkeeping.
                    let outcome = match tokio::spawn(fut).await {
                        Ok(output) => LimiterOutcome::Completed { index, output },
                        Err(e) => {
                            stats.total_panicked.fetch_add(1, Ordering::Relaxed);
                            let message = panic_message(e);
                            warn!("Worker for item {} panicked: {}", index, message);
                            LimiterOutcome::Panicked { index, message }
                        }
                    };

                    stats.active.fetch_sub(1, Ordering::Relaxed);
                    stats.total_processed.fetch_add(1, Ordering::Relaxed);

                    // Deliver before freeing the slot so consumers observe the
                    // outcome ahead of the next item starting.
                    let _ = tx.send(outcome);
                    drop(permit);
                });
            }
        });

        LimiterRun { rx, total }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "worker task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Stream of outcomes for one run, in completion order.
///
/// Ends once every item has produced exactly one outcome.
pub struct LimiterRun<T, R> {
    rx: mpsc::UnboundedReceiver<LimiterOutcome<T, R>>,
    total: usize,
}

impl<T, R> LimiterRun<T, R> {
    /// Number of items submitted to this run.
    pub fn total(&self) -> usize {
        self.total
    }
}

impl<T, R> Stream for LimiterRun<T, R> {
    type Item = LimiterOutcome<T, R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready, task};

    struct Gauge {
        current: AtomicUsize,
        high: AtomicUsize,
    }

    impl Gauge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                high: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.high.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        fn high(&self) -> usize {
            self.high.load(Ordering::SeqCst)
        }
    }

    fn gauged_sleep(
        gauge: Arc<Gauge>,
    ) -> impl Fn(u64, CancellationToken) -> Pin<Box<dyn Future<Output = u64> + Send>>
           + Send
           + Sync
           + 'static {
        move |ms, _| {
            let gauge = Arc::clone(&gauge);
            Box::pin(async move {
                gauge.enter();
                tokio::time::sleep(Duration::from_millis(ms)).await;
                gauge.exit();
                ms
            })
        }
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = assert_err!(ConcurrencyLimiter::new(0));
        assert_eq!(err, LimiterError::InvalidConcurrency(0));
        assert_ok!(ConcurrencyLimiter::new(1));
    }

    #[tokio::test]
    async fn test_outcomes_pending_until_a_worker_finishes() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let mut run = task::spawn(limiter.run(
            vec![30],
            gauged_sleep(Gauge::new()),
            CancellationToken::new(),
        ));

        assert_pending!(run.poll_next());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(run.is_woken());
        match assert_ready!(run.poll_next()) {
            Some(LimiterOutcome::Completed { index, output }) => {
                assert_eq!(index, 0);
                assert_eq!(output, 30);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(assert_ready!(run.poll_next()).is_none());
    }

    #[tokio::test]
    async fn test_max_concurrency_never_exceeded() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let gauge = Gauge::new();

        let outcomes: Vec<_> = limiter
            .run(vec![20; 10], gauged_sleep(gauge.clone()), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(outcomes.len(), 10);
        assert!(gauge.high() <= 3);
        assert_eq!(gauge.high(), 3);

        let status = limiter.status();
        assert_eq!(status.active, 0);
        assert_eq!(status.queued, 0);
        assert_eq!(status.total_processed, 10);
    }

    #[tokio::test]
    async fn test_results_in_completion_order() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let outcomes: Vec<_> = limiter
            .run(
                vec![120, 10, 60],
                gauged_sleep(Gauge::new()),
                CancellationToken::new(),
            )
            .collect()
            .await;

        let order: Vec<usize> = outcomes.iter().map(|o| o.index()).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn test_no_head_of_line_blocking() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let outcomes: Vec<_> = limiter
            .run(
                vec![300, 10, 10, 10, 10],
                gauged_sleep(Gauge::new()),
                CancellationToken::new(),
            )
            .collect()
            .await;

        let order: Vec<usize> = outcomes.iter().map(|o| o.index()).collect();
        assert_eq!(order.last(), Some(&0));
    }

    #[tokio::test]
    async fn test_panic_does_not_affect_siblings() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let outcomes: Vec<_> = limiter
            .run(
                vec![1u32, 2, 3],
                |n, _| async move {
                    if n == 2 {
                        panic!("bad item");
                    }
                    n * 10
                },
                CancellationToken::new(),
            )
            .collect()
            .await;

        assert_eq!(outcomes.len(), 3);
        let mut completed = Vec::new();
        for outcome in outcomes {
            match outcome {
                LimiterOutcome::Completed { output, .. } => completed.push(output),
                LimiterOutcome::Panicked { index, message } => {
                    assert_eq!(index, 1);
                    assert!(message.contains("bad item"));
                }
                LimiterOutcome::Skipped { .. } => panic!("nothing should be skipped"),
            }
        }
        completed.sort();
        assert_eq!(completed, vec![10, 30]);
        assert_eq!(limiter.status().total_panicked, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let outcomes: Vec<_> = limiter
            .run(vec!["a", "b", "c"], |s, _| async move { s.len() }, token)
            .collect()
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, LimiterOutcome::Skipped { .. })));
    }

    #[tokio::test]
    async fn test_cancel_mid_run_lets_in_flight_finish() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let token = CancellationToken::new();

        let outcomes: Vec<_> = limiter
            .run(
                vec![0usize, 1, 2, 3],
                |n, token| async move {
                    if n == 0 {
                        token.cancel();
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    n
                },
                token,
            )
            .collect()
            .await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, LimiterOutcome::Completed { index: 0, output: 0 })));
        let skipped: Vec<usize> = outcomes
            .iter()
            .filter_map(|o| match o {
                LimiterOutcome::Skipped { item, .. } => Some(*item),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_bound_is_shared_across_runs() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let gauge = Gauge::new();

        let first = limiter.run(vec![30; 4], gauged_sleep(gauge.clone()), CancellationToken::new());
        let second = limiter.run(vec![30; 4], gauged_sleep(gauge.clone()), CancellationToken::new());

        let (a, b): (Vec<_>, Vec<_>) = tokio::join!(first.collect(), second.collect());
        assert_eq!(a.len() + b.len(), 8);
        assert!(gauge.high() <= 2);
    }

    #[tokio::test]
    async fn test_empty_run_ends_immediately() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let run = limiter.run(Vec::<u8>::new(), |n, _| async move { n }, CancellationToken::new());
        assert_eq!(run.total(), 0);
        let outcomes: Vec<_> = run.collect().await;
        assert!(outcomes.is_empty());
    }
}
