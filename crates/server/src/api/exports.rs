//! Export API handler.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use invoicer_core::PackageResult;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportBody {
    pub invoice_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    #[serde(flatten)]
    pub result: PackageResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_size: Option<usize>,
    /// Why no archive was produced, when none was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Package the selected invoices and hand the archive to the sink.
pub async fn export_invoices(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExportBody>,
) -> Result<Json<ExportResponse>, ApiError> {
    let result = state.exports().export_batch(&body.invoice_ids).await?;
    Ok(Json(ExportResponse {
        archive_size: result.archive_size(),
        message: result.failure_message(),
        result,
    }))
}
