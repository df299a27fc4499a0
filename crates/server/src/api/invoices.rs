//! Invoice API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use invoicer_core::{DeleteOutcome, Invoice, InvoiceStatus};

use super::error::ApiError;
use crate::state::AppState;

/// Request body for a single-file upload outside of a batch.
#[derive(Debug, Deserialize)]
pub struct UploadInvoiceBody {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct UploadInvoiceResponse {
    pub invoice_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteInvoicesBody {
    pub invoice_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: InvoiceStatus,
}

#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub invoice_id: String,
    pub old_status: InvoiceStatus,
    pub new_status: InvoiceStatus,
}

pub async fn upload_invoice(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UploadInvoiceBody>,
) -> Result<(StatusCode, Json<UploadInvoiceResponse>), ApiError> {
    let invoice_id = state.invoices().upload(&body.path).await?;
    Ok((StatusCode::CREATED, Json(UploadInvoiceResponse { invoice_id })))
}

pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    state
        .invoices()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Invoice not found: {}", id)))
}

pub async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.invoices().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Bulk delete. Per-invoice failures are reported in the body.
pub async fn delete_invoices(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteInvoicesBody>,
) -> Result<Json<DeleteOutcome>, ApiError> {
    if body.invoice_ids.is_empty() {
        return Err(ApiError::bad_request("No invoices selected"));
    }
    Ok(Json(state.invoices().delete_many(&body.invoice_ids).await))
}

pub async fn update_invoice_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<UpdateStatusResponse>, ApiError> {
    let old_status = state.invoices().update_status(&id, body.status).await?;
    Ok(Json(UpdateStatusResponse {
        invoice_id: id,
        old_status,
        new_status: body.status,
    }))
}
