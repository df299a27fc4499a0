//! Status propagation bus.
//!
//! Components that change invoices or sets publish a [`DomainEvent`] once;
//! dependent aggregates subscribe and converge on their own schedule.

mod bus;
mod types;

pub use bus::{EventBus, EventHandler, FnHandler, Subscription};
pub use types::{DomainEvent, EventEnvelope, EventKind};
