//! Reimbursement set API handlers.
//!
//! Reads come from the set aggregate, which converges on the bus after every
//! command; commands go through the set service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use invoicer_core::{ReimbursementSet, SetStatus, SetStatusChange, SetView};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSetBody {
    pub name: String,
    #[serde(default)]
    pub invoice_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceIdsBody {
    pub invoice_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSetStatusBody {
    pub status: SetStatus,
}

#[derive(Debug, Serialize)]
pub struct ListSetsResponse {
    pub sets: Vec<SetView>,
    /// Aggregate reloads so far. Clients can poll until it moves.
    pub revision: u64,
}

#[derive(Debug, Serialize)]
pub struct DeleteSetResponse {
    pub set_id: String,
    pub released_invoice_ids: Vec<String>,
}

pub async fn list_sets(State(state): State<Arc<AppState>>) -> Json<ListSetsResponse> {
    let aggregate = state.set_aggregate();
    Json(ListSetsResponse {
        sets: aggregate.sets().await,
        revision: aggregate.reload_count(),
    })
}

pub async fn get_set(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SetView>, ApiError> {
    state
        .set_aggregate()
        .set(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Reimbursement set not found: {}", id)))
}

pub async fn create_set(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSetBody>,
) -> Result<(StatusCode, Json<ReimbursementSet>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Set name must not be empty"));
    }
    let set = state.sets().create(name, &body.invoice_ids).await?;
    Ok((StatusCode::CREATED, Json(set)))
}

pub async fn add_invoices(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<InvoiceIdsBody>,
) -> Result<StatusCode, ApiError> {
    state.sets().add_invoices(&id, &body.invoice_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_invoices(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InvoiceIdsBody>,
) -> Result<StatusCode, ApiError> {
    state.sets().remove_invoices(&body.invoice_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSetStatusBody>,
) -> Result<Json<SetStatusChange>, ApiError> {
    let change = state.sets().update_status(&id, body.status).await?;
    Ok(Json(change))
}

pub async fn delete_set(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteSetResponse>, ApiError> {
    let released = state.sets().delete(&id).await?;
    Ok(Json(DeleteSetResponse {
        set_id: id,
        released_invoice_ids: released,
    }))
}
