//! Collaborator traits consumed by the transfer pipeline.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::RepositoryError;
use super::types::{
    Invoice, InvoiceId, InvoiceStatus, ReimbursementSet, SetStatus, SetStatusChange,
};

/// Remote invoice store.
///
/// Implementations own the wire protocol and are expected to retry transient
/// network failures internally, most importantly in `get_pdf_bytes`.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Returns the name of this repository implementation.
    fn name(&self) -> &str;

    /// Uploads a file and starts ingestion, returning the new invoice id.
    async fn create(&self, file: &Path) -> Result<InvoiceId, RepositoryError>;

    /// Uploads a file while reporting progress percentages (0-100).
    ///
    /// If the receiver is dropped, the upload continues without reporting.
    async fn create_with_progress(
        &self,
        file: &Path,
        progress_tx: mpsc::Sender<u8>,
    ) -> Result<InvoiceId, RepositoryError> {
        drop(progress_tx);
        self.create(file).await
    }

    /// Fetches an invoice record.
    async fn get_by_id(&self, id: &str) -> Result<Option<Invoice>, RepositoryError>;

    /// Downloads the original PDF of an invoice.
    async fn get_pdf_bytes(&self, invoice: &Invoice) -> Result<Vec<u8>, RepositoryError>;

    /// Changes the status of an invoice, returning the previous status.
    async fn update_status(
        &self,
        id: &str,
        status: InvoiceStatus,
    ) -> Result<InvoiceStatus, RepositoryError>;

    /// Deletes an invoice and its file.
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

/// Remote reimbursement-set store.
///
/// Only the set-management flow calls this; the transfer pipeline reaches
/// sets exclusively through domain events.
#[async_trait]
pub trait ReimbursementSetRepository: Send + Sync {
    /// Returns the name of this repository implementation.
    fn name(&self) -> &str;

    /// Lists every set.
    async fn get_all(&self) -> Result<Vec<ReimbursementSet>, RepositoryError>;

    /// Lists the member invoices of a set.
    async fn get_invoices(&self, set_id: &str) -> Result<Vec<Invoice>, RepositoryError>;

    /// Creates a set holding the given invoices.
    async fn create(
        &self,
        name: &str,
        invoice_ids: &[InvoiceId],
    ) -> Result<ReimbursementSet, RepositoryError>;

    /// Adds invoices to an existing set.
    async fn add_invoices(&self, set_id: &str, invoice_ids: &[InvoiceId])
        -> Result<(), RepositoryError>;

    /// Detaches invoices from whatever set holds them.
    async fn remove_invoices(&self, invoice_ids: &[InvoiceId]) -> Result<(), RepositoryError>;

    /// Changes a set's status; member invoices follow.
    async fn update_status(
        &self,
        set_id: &str,
        status: SetStatus,
    ) -> Result<SetStatusChange, RepositoryError>;

    /// Deletes a set, detaching its invoices.
    async fn delete(&self, set_id: &str) -> Result<Vec<InvoiceId>, RepositoryError>;
}
