use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info};

use crate::events::{DomainEvent, EventBus, EventHandler, EventKind, Subscription};
use crate::metrics::SET_RELOADS;
use crate::repository::{
    InvoiceId, InvoiceStatus, ReimbursementSet, ReimbursementSetRepository, RepositoryError,
};

/// A set as shown to the user, with totals computed from its members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetView {
    #[serde(flatten)]
    pub set: ReimbursementSet,
    pub invoice_count: usize,
    pub total_amount_cents: i64,
}

#[derive(Default)]
struct Snapshot {
    sets: Vec<SetView>,
    invoice_status: HashMap<InvoiceId, InvoiceStatus>,
}

/// Read model of every reimbursement set.
///
/// Never patched incrementally: any invoice- or set-affecting event triggers
/// a full reload from the repository.
pub struct ReimbursementSetAggregate {
    repository: Arc<dyn ReimbursementSetRepository>,
    snapshot: RwLock<Snapshot>,
    /// Serializes reloads so an older fetch never overwrites a newer one.
    reload_lock: Mutex<()>,
    reloads: AtomicU64,
    revision: watch::Sender<u64>,
}

impl ReimbursementSetAggregate {
    pub fn new(repository: Arc<dyn ReimbursementSetRepository>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            repository,
            snapshot: RwLock::new(Snapshot::default()),
            reload_lock: Mutex::new(()),
            reloads: AtomicU64::new(0),
            revision,
        }
    }

    /// Subscribe `aggregate` to every set-affecting event on `bus`.
    pub fn attach(aggregate: &Arc<Self>, bus: &EventBus) -> Subscription {
        bus.subscribe(
            EventKind::SET_AFFECTING,
            Arc::clone(aggregate) as Arc<dyn EventHandler>,
        )
    }

    /// Refetch every set and its members.
    pub async fn reload(&self) -> Result<(), RepositoryError> {
        let _guard = self.reload_lock.lock().await;

        let result = self.fetch().await;
        match result {
            Ok(snapshot) => {
                let count = snapshot.sets.len();
                *self.snapshot.write().await = snapshot;
                let reloads = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
                self.revision.send_replace(reloads);
                SET_RELOADS.with_label_values(&["ok"]).inc();
                debug!("Reloaded {} reimbursement set(s) (revision {})", count, reloads);
                Ok(())
            }
            Err(e) => {
                SET_RELOADS.with_label_values(&["error"]).inc();
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<Snapshot, RepositoryError> {
        let mut snapshot = Snapshot::default();
        for set in self.repository.get_all().await? {
            let members = self.repository.get_invoices(&set.id).await?;
            let total_amount_cents = members.iter().map(|i| i.amount_cents).sum();
            for invoice in &members {
                snapshot.invoice_status.insert(invoice.id.clone(), invoice.status);
            }
            snapshot.sets.push(SetView {
                invoice_count: members.len(),
                total_amount_cents,
                set,
            });
        }
        Ok(snapshot)
    }

    pub async fn sets(&self) -> Vec<SetView> {
        self.snapshot.read().await.sets.clone()
    }

    pub async fn set(&self, id: &str) -> Option<SetView> {
        self.snapshot
            .read()
            .await
            .sets
            .iter()
            .find(|view| view.set.id == id)
            .cloned()
    }

    /// Last known status of a set member.
    pub async fn invoice_status(&self, id: &str) -> Option<InvoiceStatus> {
        self.snapshot.read().await.invoice_status.get(id).copied()
    }

    /// Completed reloads so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Receiver that changes after every completed reload.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[async_trait]
impl EventHandler for ReimbursementSetAggregate {
    fn name(&self) -> &str {
        "reimbursement_set_aggregate"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        info!("Reloading reimbursement sets after {}", event.event_type());
        self.reload().await?;
        Ok(())
    }
}
