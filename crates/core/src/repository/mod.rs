//! Repository collaborators.
//!
//! The pipeline talks to the remote invoice store and the reimbursement-set
//! store only through the traits defined here. `LocalRepository` is a
//! directory-backed implementation of both used for development and tests.

mod error;
mod local;
mod traits;
mod types;

pub use error::RepositoryError;
pub use local::LocalRepository;
pub use traits::{InvoiceRepository, ReimbursementSetRepository};
pub use types::*;
