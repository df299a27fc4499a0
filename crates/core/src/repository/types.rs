//! Records exchanged with the invoice and reimbursement-set repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an invoice record in the remote store.
pub type InvoiceId = String;

/// Identifier of a reimbursement set.
pub type SetId = String;

/// Processing status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Accepted, recognition still running.
    Processing,
    /// Recognition finished, fields are available.
    Recognized,
    /// Recognition failed on the backend.
    Failed,
    /// Member of a submitted reimbursement set.
    Submitted,
    /// Member of a reimbursed set.
    Reimbursed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::Recognized => "recognized",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Submitted => "submitted",
            InvoiceStatus::Reimbursed => "reimbursed",
        }
    }
}

/// Status of a reimbursement set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    Draft,
    Submitted,
    Reimbursed,
}

impl SetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetStatus::Draft => "draft",
            SetStatus::Submitted => "submitted",
            SetStatus::Reimbursed => "reimbursed",
        }
    }

    /// Status member invoices take when their set enters this status.
    pub fn member_invoice_status(&self) -> InvoiceStatus {
        match self {
            SetStatus::Draft => InvoiceStatus::Recognized,
            SetStatus::Submitted => InvoiceStatus::Submitted,
            SetStatus::Reimbursed => InvoiceStatus::Reimbursed,
        }
    }
}

/// An invoice record as the pipeline sees it.
///
/// Only the fields the transfer pipeline reads or writes are modelled here;
/// everything else recognized from the document stays in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    /// Invoice number recognized from the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    /// Seller name recognized from the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,
    /// Total amount in minor currency units.
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    /// Storage reference of the original PDF. `None` when the record has no file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<String>,
    /// Original file name of the upload.
    pub file_name: String,
    /// Set this invoice currently belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_id: Option<SetId>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Whether the record references a downloadable file.
    pub fn has_file(&self) -> bool {
        self.file_ref.as_deref().is_some_and(|r| !r.is_empty())
    }
}

/// A reimbursement set as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReimbursementSet {
    pub id: SetId,
    pub name: String,
    pub status: SetStatus,
    pub invoice_ids: Vec<InvoiceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a set status update reported by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStatusChange {
    pub set_id: SetId,
    pub old_status: SetStatus,
    pub new_status: SetStatus,
    /// Invoices whose status changed with the set.
    pub affected_invoice_ids: Vec<InvoiceId>,
}
