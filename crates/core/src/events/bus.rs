//! In-process publish/subscribe bus for domain events.
//!
//! Each subscription owns a dispatcher task fed by a tokio broadcast channel,
//! so handlers run outside the publisher's call stack and a slow subscriber
//! only ever delays itself. A subscriber that falls more than `capacity`
//! events behind skips the overflow (at-most-once delivery).

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::types::{DomainEvent, EventEnvelope, EventKind};
use crate::metrics::{EVENTS_PUBLISHED, EVENT_HANDLER_FAILURES};

/// A subscriber reacting to domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Handles one event. Errors are logged and never reach the publisher.
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Live subscription. Dropping it leaves the handler attached; call
/// [`Subscription::unsubscribe`] to detach.
pub struct Subscription {
    name: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the dispatcher task is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Detaches the handler. Events already being handled are interrupted at
    /// their next suspension point.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

/// Explicitly constructed event bus. Clone it to share between components.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<EventEnvelope>>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus whose subscribers may lag at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Never blocks and never fails; returns how many subscribers were reached.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let event_type = event.event_type();
        let envelope = Arc::new(EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            published_at: Utc::now(),
            event,
        });

        EVENTS_PUBLISHED.with_label_values(&[event_type]).inc();

        match self.sender.send(envelope) {
            Ok(receivers) => {
                debug!("Published {} to {} subscriber(s)", event_type, receivers);
                receivers
            }
            Err(_) => {
                debug!("Published {} with no subscribers", event_type);
                0
            }
        }
    }

    /// Attach a handler for the given event kinds.
    pub fn subscribe(&self, kinds: &[EventKind], handler: Arc<dyn EventHandler>) -> Subscription {
        self.spawn_dispatcher(Some(kinds.to_vec()), handler)
    }

    /// Attach a handler for every event.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> Subscription {
        self.spawn_dispatcher(None, handler)
    }

    /// Attach an async closure for the given event kinds.
    pub fn subscribe_fn<F, Fut>(&self, name: &str, kinds: &[EventKind], f: F) -> Subscription
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(kinds, Arc::new(FnHandler::new(name, f)))
    }

    /// Raw receiver of every envelope, for bridges that forward events
    /// elsewhere (e.g. WebSocket clients).
    pub fn receiver(&self) -> broadcast::Receiver<Arc<EventEnvelope>> {
        self.sender.subscribe()
    }

    /// Number of attached receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn spawn_dispatcher(
        &self,
        kinds: Option<Vec<EventKind>>,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        // Register before spawning so events published right after
        // `subscribe` returns are not missed.
        let mut rx = self.sender.subscribe();
        let name = handler.name().to_string();

        let task = tokio::spawn(async move {
            loop {
                let envelope = match rx.recv().await {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Event subscriber '{}' lagged, skipped {} event(s)",
                            handler.name(),
                            skipped
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if let Some(kinds) = &kinds {
                    if !kinds.contains(&envelope.event.kind()) {
                        continue;
                    }
                }

                let outcome = AssertUnwindSafe(handler.handle(&envelope.event))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        EVENT_HANDLER_FAILURES
                            .with_label_values(&[handler.name()])
                            .inc();
                        error!(
                            "Event handler '{}' failed on {} (#{}): {:#}",
                            handler.name(),
                            envelope.event.event_type(),
                            envelope.sequence,
                            e
                        );
                    }
                    Err(_) => {
                        EVENT_HANDLER_FAILURES
                            .with_label_values(&[handler.name()])
                            .inc();
                        error!(
                            "Event handler '{}' panicked on {} (#{})",
                            handler.name(),
                            envelope.event.event_type(),
                            envelope.sequence
                        );
                    }
                }
            }
            debug!("Event dispatcher for '{}' stopped", handler.name());
        });

        Subscription { name, task }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
