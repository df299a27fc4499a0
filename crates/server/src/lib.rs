//! HTTP and WebSocket surface of the invoice transfer pipeline.

pub mod api;
pub mod metrics;
pub mod state;
