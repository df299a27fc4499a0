use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{exports, handlers, invoices, middleware::metrics_middleware, sets, uploads, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Upload batches
        .route("/uploads", post(uploads::submit_upload))
        .route("/uploads", get(uploads::get_progress))
        .route("/uploads", delete(uploads::clear_results))
        .route("/uploads/cancel", post(uploads::cancel_upload))
        .route("/uploads/tasks/{task_id}/retry", post(uploads::retry_task))
        // Export
        .route("/exports", post(exports::export_invoices))
        // Invoices
        .route("/invoices", post(invoices::upload_invoice))
        .route("/invoices/delete", post(invoices::delete_invoices))
        .route("/invoices/{id}", get(invoices::get_invoice))
        .route("/invoices/{id}", delete(invoices::delete_invoice))
        .route("/invoices/{id}/status", put(invoices::update_invoice_status))
        // Reimbursement sets
        .route("/sets", get(sets::list_sets))
        .route("/sets", post(sets::create_set))
        .route("/sets/invoices/remove", post(sets::remove_invoices))
        .route("/sets/{id}", get(sets::get_set))
        .route("/sets/{id}", delete(sets::delete_set))
        .route("/sets/{id}/invoices", post(sets::add_invoices))
        .route("/sets/{id}/status", put(sets::update_set_status))
        // Live updates
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
