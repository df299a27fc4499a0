//! Reimbursement sets.
//!
//! [`ReimbursementSetService`] runs the set-management commands and publishes
//! their events. [`ReimbursementSetAggregate`] is the read model kept in
//! sync through the bus.

mod aggregate;
mod service;

pub use aggregate::{ReimbursementSetAggregate, SetView};
pub use service::ReimbursementSetService;
