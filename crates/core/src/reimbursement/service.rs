use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::events::{DomainEvent, EventBus};
use crate::repository::{
    InvoiceId, ReimbursementSet, ReimbursementSetRepository, RepositoryError, SetStatus,
    SetStatusChange,
};

/// Set-management commands. Every successful mutation is announced on the
/// bus so dependent aggregates can converge.
pub struct ReimbursementSetService {
    repository: Arc<dyn ReimbursementSetRepository>,
    bus: EventBus,
}

impl ReimbursementSetService {
    pub fn new(repository: Arc<dyn ReimbursementSetRepository>, bus: EventBus) -> Self {
        Self { repository, bus }
    }

    pub async fn list(&self) -> Result<Vec<ReimbursementSet>, RepositoryError> {
        self.repository.get_all().await
    }

    pub async fn create(
        &self,
        name: &str,
        invoice_ids: &[InvoiceId],
    ) -> Result<ReimbursementSet, RepositoryError> {
        let set = self.repository.create(name, invoice_ids).await?;
        info!("Created reimbursement set {} with {} invoice(s)", set.id, invoice_ids.len());

        self.bus.publish(DomainEvent::ReimbursementSetCreated {
            set_id: set.id.clone(),
        });
        if !invoice_ids.is_empty() {
            self.bus.publish(DomainEvent::InvoicesAddedToSet {
                set_id: set.id.clone(),
                invoice_ids: invoice_ids.to_vec(),
            });
        }
        Ok(set)
    }

    pub async fn add_invoices(
        &self,
        set_id: &str,
        invoice_ids: &[InvoiceId],
    ) -> Result<(), RepositoryError> {
        if invoice_ids.is_empty() {
            return Ok(());
        }
        self.repository.add_invoices(set_id, invoice_ids).await?;
        self.bus.publish(DomainEvent::InvoicesAddedToSet {
            set_id: set_id.to_string(),
            invoice_ids: invoice_ids.to_vec(),
        });
        Ok(())
    }

    pub async fn remove_invoices(&self, invoice_ids: &[InvoiceId]) -> Result<(), RepositoryError> {
        if invoice_ids.is_empty() {
            return Ok(());
        }
        self.repository.remove_invoices(invoice_ids).await?;
        self.bus.publish(DomainEvent::InvoicesRemovedFromSet {
            invoice_ids: invoice_ids.to_vec(),
        });
        Ok(())
    }

    pub async fn update_status(
        &self,
        set_id: &str,
        status: SetStatus,
    ) -> Result<SetStatusChange, RepositoryError> {
        let change = self.repository.update_status(set_id, status).await?;
        info!(
            "Reimbursement set {} moved {} -> {} ({} invoice(s))",
            set_id,
            change.old_status.as_str(),
            change.new_status.as_str(),
            change.affected_invoice_ids.len()
        );
        self.bus.publish(DomainEvent::ReimbursementSetStatusChanged {
            set_id: change.set_id.clone(),
            old_status: change.old_status,
            new_status: change.new_status,
            affected_invoice_ids: change.affected_invoice_ids.clone(),
            timestamp: Utc::now(),
        });
        Ok(change)
    }

    /// Delete a set, returning the invoices it released.
    pub async fn delete(&self, set_id: &str) -> Result<Vec<InvoiceId>, RepositoryError> {
        let released = self.repository.delete(set_id).await?;
        self.bus.publish(DomainEvent::ReimbursementSetDeleted {
            set_id: set_id.to_string(),
            invoice_ids: released.clone(),
        });
        Ok(released)
    }
}
