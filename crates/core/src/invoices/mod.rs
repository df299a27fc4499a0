//! Single-invoice commands outside of batch uploads.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::events::{DomainEvent, EventBus};
use crate::repository::{Invoice, InvoiceId, InvoiceRepository, InvoiceStatus, RepositoryError};

/// Invoice commands that announce their effects on the bus.
pub struct InvoiceService {
    repository: Arc<dyn InvoiceRepository>,
    bus: EventBus,
}

/// Outcome of a bulk delete. Ids that failed are reported, not fatal.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<InvoiceId>,
    pub failed: Vec<(InvoiceId, String)>,
}

impl InvoiceService {
    pub fn new(repository: Arc<dyn InvoiceRepository>, bus: EventBus) -> Self {
        Self { repository, bus }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Invoice>, RepositoryError> {
        self.repository.get_by_id(id).await
    }

    /// Upload one file outside of a batch.
    pub async fn upload(&self, file: &Path) -> Result<InvoiceId, RepositoryError> {
        let invoice_id = self.repository.create(file).await?;
        info!("Uploaded {} as invoice {}", file.display(), invoice_id);
        self.bus.publish(DomainEvent::InvoiceUploaded {
            invoice_id: invoice_id.clone(),
        });
        Ok(invoice_id)
    }

    pub async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.repository.delete(id).await?;
        self.bus.publish(DomainEvent::InvoiceDeleted {
            invoice_id: id.to_string(),
        });
        Ok(())
    }

    /// Delete several invoices. One `InvoicesDeleted` event carries the ids
    /// that were actually removed.
    pub async fn delete_many(&self, ids: &[InvoiceId]) -> DeleteOutcome {
        let mut outcome = DeleteOutcome::default();
        for id in ids {
            match self.repository.delete(id).await {
                Ok(()) => outcome.deleted.push(id.clone()),
                Err(e) => {
                    warn!("Failed to delete invoice {}: {}", id, e);
                    outcome.failed.push((id.clone(), e.to_string()));
                }
            }
        }
        if !outcome.deleted.is_empty() {
            self.bus.publish(DomainEvent::InvoicesDeleted {
                invoice_ids: outcome.deleted.clone(),
            });
        }
        outcome
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: InvoiceStatus,
    ) -> Result<InvoiceStatus, RepositoryError> {
        let old = self.repository.update_status(id, status).await?;
        if old != status {
            self.bus.publish(DomainEvent::InvoiceStatusChanged {
                invoice_id: id.to_string(),
                old,
                new: status,
            });
        }
        Ok(old)
    }
}
