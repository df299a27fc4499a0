//! Status propagation integration tests.
//!
//! These tests wire the set service, the invoice service and the set
//! aggregate to one bus over the local repository and check that the
//! aggregate converges after each published change.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use invoicer_core::{
    testing::fixtures, DomainEvent, EventBus, EventKind, InvoiceService, InvoiceStatus,
    LocalRepository, ReimbursementSetAggregate, ReimbursementSetService, SetStatus,
};

struct TestHarness {
    _store: TempDir,
    bus: EventBus,
    sets: ReimbursementSetService,
    invoices: InvoiceService,
    aggregate: Arc<ReimbursementSetAggregate>,
    revisions: watch::Receiver<u64>,
}

impl TestHarness {
    async fn new() -> Self {
        let store = TempDir::new().expect("Failed to create temp dir");
        let repository = Arc::new(LocalRepository::new(store.path()).unwrap());
        for id in ["x", "y", "z"] {
            repository.insert(fixtures::invoice(id), None).await.unwrap();
        }

        let bus = EventBus::new(64);
        let aggregate = Arc::new(ReimbursementSetAggregate::new(repository.clone()));
        // Attached for the lifetime of the test.
        let _ = ReimbursementSetAggregate::attach(&aggregate, &bus);
        let revisions = aggregate.revisions();

        Self {
            _store: store,
            sets: ReimbursementSetService::new(repository.clone(), bus.clone()),
            invoices: InvoiceService::new(repository, bus.clone()),
            bus,
            aggregate,
            revisions,
        }
    }

    /// Wait until the aggregate has completed at least `count` reloads.
    async fn wait_reloads(&mut self, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while *self.revisions.borrow_and_update() < count {
                self.revisions.changed().await.expect("aggregate dropped");
            }
        })
        .await
        .expect("Timed out waiting for aggregate reload");
    }
}

#[tokio::test]
async fn test_status_change_reaches_aggregate() {
    let mut harness = TestHarness::new().await;
    let members = vec!["x".to_string(), "y".to_string()];

    let set = harness.sets.create("Conference", &members).await.unwrap();
    // Created + InvoicesAddedToSet.
    harness.wait_reloads(2).await;
    assert_eq!(
        harness.aggregate.invoice_status("x").await,
        Some(InvoiceStatus::Recognized)
    );

    let change = harness
        .sets
        .update_status(&set.id, SetStatus::Submitted)
        .await
        .unwrap();
    assert_eq!(change.affected_invoice_ids, members);

    harness.wait_reloads(3).await;
    assert_eq!(
        harness.aggregate.invoice_status("x").await,
        Some(InvoiceStatus::Submitted)
    );
    assert_eq!(
        harness.aggregate.invoice_status("y").await,
        Some(InvoiceStatus::Submitted)
    );
    assert_eq!(harness.aggregate.invoice_status("z").await, None);
    assert_eq!(
        harness.aggregate.set(&set.id).await.unwrap().set.status,
        SetStatus::Submitted
    );
}

#[tokio::test]
async fn test_published_event_alone_triggers_reload() {
    let mut harness = TestHarness::new().await;
    let set = harness
        .sets
        .create("Travel", &["x".to_string(), "y".to_string()])
        .await
        .unwrap();
    harness.wait_reloads(2).await;

    // Publishing the event by hand must be enough for the aggregate to catch
    // up with whatever the repository holds.
    harness.bus.publish(DomainEvent::ReimbursementSetStatusChanged {
        set_id: set.id.clone(),
        old_status: SetStatus::Draft,
        new_status: SetStatus::Reimbursed,
        affected_invoice_ids: vec!["x".to_string(), "y".to_string()],
        timestamp: chrono::Utc::now(),
    });
    harness.wait_reloads(3).await;
    assert_eq!(harness.aggregate.reload_count(), 3);
}

#[tokio::test]
async fn test_invoice_delete_updates_totals() {
    let mut harness = TestHarness::new().await;
    let set = harness
        .sets
        .create("Office", &["x".to_string(), "y".to_string()])
        .await
        .unwrap();
    harness.wait_reloads(2).await;
    assert_eq!(harness.aggregate.set(&set.id).await.unwrap().invoice_count, 2);

    harness.invoices.delete("y").await.unwrap();
    harness.wait_reloads(3).await;

    let view = harness.aggregate.set(&set.id).await.unwrap();
    assert_eq!(view.invoice_count, 1);
    assert_eq!(view.total_amount_cents, 10_000);
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() {
    let mut harness = TestHarness::new().await;
    let _broken = harness.bus.subscribe_fn(
        "broken",
        EventKind::SET_AFFECTING,
        |_event| async { Err::<(), _>(anyhow::anyhow!("subscriber down")) },
    );

    harness
        .sets
        .create("Broken neighbour", &["z".to_string()])
        .await
        .unwrap();
    harness.wait_reloads(2).await;
    assert_eq!(harness.aggregate.sets().await.len(), 1);
}
