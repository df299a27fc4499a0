//! Testing utilities and mock implementations.
//!
//! Mocks of the collaborator traits let the pipeline be exercised without a
//! remote store or a real filesystem target.
//!
//! # Example
//!
//! ```rust,ignore
//! use invoicer_core::testing::{MockInvoiceRepository, MockSink, MockOutcome};
//!
//! let repo = MockInvoiceRepository::new();
//! let sink = MockSink::new();
//!
//! // Configure mock responses
//! repo.push_outcome("b.pdf", MockOutcome::Duplicate(None)).await;
//! repo.add_invoice(fixtures::invoice("inv-1"), Some(b"%PDF-1".to_vec())).await;
//! ```

mod mock_repository;
mod mock_sink;

pub use mock_repository::{MockInvoiceRepository, MockOutcome, RecordedCreate};
pub use mock_sink::{MockSink, RecordedDelivery};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use chrono::Utc;

    use crate::repository::{Invoice, InvoiceStatus};

    /// Create a recognized invoice with reasonable defaults and no file.
    pub fn invoice(id: &str) -> Invoice {
        Invoice {
            id: id.to_string(),
            invoice_number: Some(format!("NO-{}", id)),
            seller_name: Some("ACME Corp".to_string()),
            amount_cents: 10_000,
            status: InvoiceStatus::Recognized,
            file_ref: None,
            file_name: format!("{}.pdf", id),
            set_id: None,
            created_at: Utc::now(),
        }
    }

    /// Write a small PDF-looking file of at least `size` bytes into `dir`.
    pub fn pdf_file(dir: &Path, name: &str, size: usize) -> PathBuf {
        let mut body = format!("%PDF-1.7\n% {}\n", name).into_bytes();
        if body.len() < size {
            body.resize(size, b'0');
        }
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write fixture file");
        path
    }
}
