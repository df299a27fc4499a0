pub mod error;
pub mod exports;
pub mod handlers;
pub mod invoices;
pub mod middleware;
pub mod routes;
pub mod sets;
pub mod uploads;
pub mod ws;

pub use routes::create_router;
pub use ws::{WsBroadcaster, WsMessage};
