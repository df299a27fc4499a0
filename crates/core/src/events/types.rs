use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::{InvoiceId, InvoiceStatus, SetId, SetStatus};

/// Domain events broadcast on the [`EventBus`](super::EventBus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A single invoice was uploaded outside of a batch.
    InvoiceUploaded { invoice_id: InvoiceId },
    /// A batch upload settled; carries the successfully created invoices.
    InvoicesUploaded {
        batch_id: String,
        invoice_ids: Vec<InvoiceId>,
    },
    InvoiceDeleted { invoice_id: InvoiceId },
    InvoicesDeleted { invoice_ids: Vec<InvoiceId> },
    InvoiceStatusChanged {
        invoice_id: InvoiceId,
        old: InvoiceStatus,
        new: InvoiceStatus,
    },
    InvoicesAddedToSet {
        set_id: SetId,
        invoice_ids: Vec<InvoiceId>,
    },
    InvoicesRemovedFromSet { invoice_ids: Vec<InvoiceId> },
    ReimbursementSetCreated { set_id: SetId },
    ReimbursementSetDeleted {
        set_id: SetId,
        invoice_ids: Vec<InvoiceId>,
    },
    ReimbursementSetStatusChanged {
        set_id: SetId,
        old_status: SetStatus,
        new_status: SetStatus,
        affected_invoice_ids: Vec<InvoiceId>,
        timestamp: DateTime<Utc>,
    },
}

/// Discriminant of a [`DomainEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InvoiceUploaded,
    InvoicesUploaded,
    InvoiceDeleted,
    InvoicesDeleted,
    InvoiceStatusChanged,
    InvoicesAddedToSet,
    InvoicesRemovedFromSet,
    ReimbursementSetCreated,
    ReimbursementSetDeleted,
    ReimbursementSetStatusChanged,
}

impl EventKind {
    /// Every kind that can change what a reimbursement set shows.
    pub const SET_AFFECTING: &'static [EventKind] = &[
        EventKind::InvoiceDeleted,
        EventKind::InvoicesDeleted,
        EventKind::InvoiceStatusChanged,
        EventKind::InvoicesAddedToSet,
        EventKind::InvoicesRemovedFromSet,
        EventKind::ReimbursementSetCreated,
        EventKind::ReimbursementSetDeleted,
        EventKind::ReimbursementSetStatusChanged,
    ];
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::InvoiceUploaded { .. } => EventKind::InvoiceUploaded,
            DomainEvent::InvoicesUploaded { .. } => EventKind::InvoicesUploaded,
            DomainEvent::InvoiceDeleted { .. } => EventKind::InvoiceDeleted,
            DomainEvent::InvoicesDeleted { .. } => EventKind::InvoicesDeleted,
            DomainEvent::InvoiceStatusChanged { .. } => EventKind::InvoiceStatusChanged,
            DomainEvent::InvoicesAddedToSet { .. } => EventKind::InvoicesAddedToSet,
            DomainEvent::InvoicesRemovedFromSet { .. } => EventKind::InvoicesRemovedFromSet,
            DomainEvent::ReimbursementSetCreated { .. } => EventKind::ReimbursementSetCreated,
            DomainEvent::ReimbursementSetDeleted { .. } => EventKind::ReimbursementSetDeleted,
            DomainEvent::ReimbursementSetStatusChanged { .. } => {
                EventKind::ReimbursementSetStatusChanged
            }
        }
    }

    /// Event type as a snake_case string (for logging and metrics).
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::InvoiceUploaded { .. } => "invoice_uploaded",
            DomainEvent::InvoicesUploaded { .. } => "invoices_uploaded",
            DomainEvent::InvoiceDeleted { .. } => "invoice_deleted",
            DomainEvent::InvoicesDeleted { .. } => "invoices_deleted",
            DomainEvent::InvoiceStatusChanged { .. } => "invoice_status_changed",
            DomainEvent::InvoicesAddedToSet { .. } => "invoices_added_to_set",
            DomainEvent::InvoicesRemovedFromSet { .. } => "invoices_removed_from_set",
            DomainEvent::ReimbursementSetCreated { .. } => "reimbursement_set_created",
            DomainEvent::ReimbursementSetDeleted { .. } => "reimbursement_set_deleted",
            DomainEvent::ReimbursementSetStatusChanged { .. } => {
                "reimbursement_set_status_changed"
            }
        }
    }

    /// Invoice ids named by the event, if any.
    pub fn invoice_ids(&self) -> Vec<&str> {
        match self {
            DomainEvent::InvoiceUploaded { invoice_id }
            | DomainEvent::InvoiceDeleted { invoice_id }
            | DomainEvent::InvoiceStatusChanged { invoice_id, .. } => vec![invoice_id.as_str()],
            DomainEvent::InvoicesUploaded { invoice_ids, .. }
            | DomainEvent::InvoicesDeleted { invoice_ids }
            | DomainEvent::InvoicesAddedToSet { invoice_ids, .. }
            | DomainEvent::InvoicesRemovedFromSet { invoice_ids }
            | DomainEvent::ReimbursementSetDeleted { invoice_ids, .. } => {
                invoice_ids.iter().map(String::as_str).collect()
            }
            DomainEvent::ReimbursementSetStatusChanged {
                affected_invoice_ids,
                ..
            } => affected_invoice_ids.iter().map(String::as_str).collect(),
            DomainEvent::ReimbursementSetCreated { .. } => Vec::new(),
        }
    }

    pub fn affects_reimbursement_sets(&self) -> bool {
        EventKind::SET_AFFECTING.contains(&self.kind())
    }
}

/// Envelope wrapping a domain event with publish metadata.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Monotonic sequence number assigned by the bus.
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub event: DomainEvent,
}
