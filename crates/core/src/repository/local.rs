//! Directory-backed repository used for local development and tests.
//!
//! Stores uploaded PDFs under `<root>/files/` and keeps records in memory.
//! Duplicate detection hashes file content with SHA-256, scoped to this store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::error::RepositoryError;
use super::traits::{InvoiceRepository, ReimbursementSetRepository};
use super::types::{
    Invoice, InvoiceId, InvoiceStatus, ReimbursementSet, SetId, SetStatus, SetStatusChange,
};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Default)]
struct LocalState {
    invoices: HashMap<InvoiceId, Invoice>,
    /// Content hash -> invoice id.
    hashes: HashMap<String, InvoiceId>,
    sets: HashMap<SetId, ReimbursementSet>,
}

/// In-memory records with files on disk, implementing both repository traits.
pub struct LocalRepository {
    root: PathBuf,
    state: RwLock<LocalState>,
}

impl LocalRepository {
    /// Creates a repository rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("files"))?;
        Ok(Self {
            root,
            state: RwLock::new(LocalState::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Inserts a record directly, optionally with file content.
    ///
    /// Used to seed invoices that did not arrive through `create`, such as
    /// records whose file was never stored.
    pub async fn insert(
        &self,
        mut invoice: Invoice,
        content: Option<&[u8]>,
    ) -> Result<(), RepositoryError> {
        if let Some(bytes) = content {
            let file_ref = format!("files/{}.pdf", invoice.id);
            tokio::fs::write(self.root.join(&file_ref), bytes).await?;
            invoice.file_ref = Some(file_ref);
            let hash = content_hash(bytes);
            self.state.write().await.hashes.insert(hash, invoice.id.clone());
        }
        self.state
            .write()
            .await
            .invoices
            .insert(invoice.id.clone(), invoice);
        Ok(())
    }

    /// Returns every invoice, newest first.
    pub async fn list_invoices(&self) -> Vec<Invoice> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state.invoices.values().cloned().collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        invoices
    }

    /// Moves invoices into `set_id`, detaching them from any previous set.
    fn attach(state: &mut LocalState, set_id: &str, invoice_ids: &[InvoiceId]) {
        for id in invoice_ids {
            let previous = state.invoices.get(id).and_then(|i| i.set_id.clone());
            if let Some(previous) = previous.filter(|p| p != set_id) {
                if let Some(set) = state.sets.get_mut(&previous) {
                    set.invoice_ids.retain(|member| member != id);
                }
            }
            if let Some(invoice) = state.invoices.get_mut(id) {
                invoice.set_id = Some(set_id.to_string());
            }
            if let Some(set) = state.sets.get_mut(set_id) {
                if !set.invoice_ids.contains(id) {
                    set.invoice_ids.push(id.clone());
                }
                set.updated_at = Utc::now();
            }
        }
    }

    fn ensure_invoices_exist(
        state: &LocalState,
        invoice_ids: &[InvoiceId],
    ) -> Result<(), RepositoryError> {
        match invoice_ids.iter().find(|id| !state.invoices.contains_key(*id)) {
            Some(missing) => Err(RepositoryError::NotFound(format!("invoice {}", missing))),
            None => Ok(()),
        }
    }
}

fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[async_trait]
impl InvoiceRepository for LocalRepository {
    fn name(&self) -> &str {
        "local"
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
        let bytes = tokio::fs::read(file).await?;
        let _ = progress_tx.try_send(30);

        if !bytes.starts_with(PDF_MAGIC) {
            return Err(RepositoryError::Rejected(format!(
                "{} is not a PDF document",
                file.display()
            )));
        }

        let hash = content_hash(&bytes);
        if let Some(existing) = self.state.read().await.hashes.get(&hash) {
            return Err(RepositoryError::Duplicate {
                existing_id: Some(existing.clone()),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let file_ref = format!("files/{}.pdf", id);
        let dest = self.root.join(&file_ref);
        tokio::fs::write(&dest, &bytes).await?;
        let _ = progress_tx.try_send(80);

        let mut state = self.state.write().await;
        // Two identical files may race past the read-locked check above.
        if let Some(existing) = state.hashes.get(&hash).cloned() {
            drop(state);
            if let Err(e) = tokio::fs::remove_file(&dest).await {
                warn!("Failed to remove duplicate upload {}: {}", dest.display(), e);
            }
            return Err(RepositoryError::Duplicate {
                existing_id: Some(existing),
            });
        }

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.pdf", id));
        let invoice_number = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string());

        state.hashes.insert(hash, id.clone());
        state.invoices.insert(
            id.clone(),
            Invoice {
                id: id.clone(),
                invoice_number,
                seller_name: None,
                amount_cents: 0,
                status: InvoiceStatus::Recognized,
                file_ref: Some(file_ref),
                file_name,
                set_id: None,
                created_at: Utc::now(),
            },
        );
        drop(state);

        let _ = progress_tx.try_send(100);
        debug!("Stored invoice {} from {}", id, file.display());
        Ok(id)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Invoice>, RepositoryError> {
        Ok(self.state.read().await.invoices.get(id).cloned())
    }

    async fn get_pdf_bytes(&self, invoice: &Invoice) -> Result<Vec<u8>, RepositoryError> {
        let file_ref = invoice
            .file_ref
            .as_deref()
            .ok_or_else(|| RepositoryError::NotFound(format!("file of invoice {}", invoice.id)))?;
        match tokio::fs::read(self.root.join(file_ref)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                RepositoryError::NotFound(format!("file of invoice {}", invoice.id)),
            ),
            Err(e) => Err(e.into()),
        }
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
        let removed = {
            let mut state = self.state.write().await;
            let removed = state
                .invoices
                .remove(id)
                .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", id)))?;
            state.hashes.retain(|_, invoice_id| invoice_id != id);
            for set in state.sets.values_mut() {
                set.invoice_ids.retain(|member| member != id);
            }
            removed
        };

        if let Some(file_ref) = removed.file_ref {
            match tokio::fs::remove_file(self.root.join(&file_ref)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove file {} of invoice {}: {}", file_ref, id, e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReimbursementSetRepository for LocalRepository {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_all(&self) -> Result<Vec<ReimbursementSet>, RepositoryError> {
        let state = self.state.read().await;
        let mut sets: Vec<ReimbursementSet> = state.sets.values().cloned().collect();
        sets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sets)
    }

    async fn get_invoices(&self, set_id: &str) -> Result<Vec<Invoice>, RepositoryError> {
        let state = self.state.read().await;
        let set = state
            .sets
            .get(set_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("set {}", set_id)))?;
        Ok(set
            .invoice_ids
            .iter()
            .filter_map(|id| state.invoices.get(id).cloned())
            .collect())
    }

    async fn create(
        &self,
        name: &str,
        invoice_ids: &[InvoiceId],
    ) -> Result<ReimbursementSet, RepositoryError> {
        if name.trim().is_empty() {
            return Err(RepositoryError::Validation("set name is empty".to_string()));
        }

        let mut state = self.state.write().await;
        Self::ensure_invoices_exist(&state, invoice_ids)?;

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        state.sets.insert(
            id.clone(),
            ReimbursementSet {
                id: id.clone(),
                name: name.trim().to_string(),
                status: SetStatus::Draft,
                invoice_ids: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        Self::attach(&mut state, &id, invoice_ids);

        state
            .sets
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("set {}", id)))
    }

    async fn add_invoices(
        &self,
        set_id: &str,
        invoice_ids: &[InvoiceId],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if !state.sets.contains_key(set_id) {
            return Err(RepositoryError::NotFound(format!("set {}", set_id)));
        }
        Self::ensure_invoices_exist(&state, invoice_ids)?;
        Self::attach(&mut state, set_id, invoice_ids);
        Ok(())
    }

    async fn remove_invoices(&self, invoice_ids: &[InvoiceId]) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        for id in invoice_ids {
            let Some(set_id) = state.invoices.get_mut(id).and_then(|i| i.set_id.take()) else {
                continue;
            };
            if let Some(set) = state.sets.get_mut(&set_id) {
                set.invoice_ids.retain(|member| member != id);
                set.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn update_status(
        &self,
        set_id: &str,
        status: SetStatus,
    ) -> Result<SetStatusChange, RepositoryError> {
        let mut state = self.state.write().await;
        let set = state
            .sets
            .get_mut(set_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("set {}", set_id)))?;
        let old_status = std::mem::replace(&mut set.status, status);
        set.updated_at = Utc::now();
        let members = set.invoice_ids.clone();

        let invoice_status = status.member_invoice_status();
        for id in &members {
            if let Some(invoice) = state.invoices.get_mut(id) {
                invoice.status = invoice_status;
            }
        }

        Ok(SetStatusChange {
            set_id: set_id.to_string(),
            old_status,
            new_status: status,
            affected_invoice_ids: members,
        })
    }

    async fn delete(&self, set_id: &str) -> Result<Vec<InvoiceId>, RepositoryError> {
        let mut state = self.state.write().await;
        let set = state
            .sets
            .remove(set_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("set {}", set_id)))?;
        for id in &set.invoice_ids {
            if let Some(invoice) = state.invoices.get_mut(id) {
                invoice.set_id = None;
            }
        }
        Ok(set.invoice_ids)
    }
}
