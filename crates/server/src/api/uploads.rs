//! Upload batch API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use invoicer_core::{ProgressSnapshot, SubmitWarning};

use super::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a batch.
#[derive(Debug, Deserialize)]
pub struct SubmitUploadBody {
    /// Local paths of the selected files, in selection order.
    pub paths: Vec<PathBuf>,
}

/// Dropped-file warning as shown to the user.
#[derive(Debug, Serialize)]
pub struct WarningResponse {
    #[serde(flatten)]
    pub warning: SubmitWarning,
    pub message: String,
}

impl From<SubmitWarning> for WarningResponse {
    fn from(warning: SubmitWarning) -> Self {
        Self {
            message: warning.message(),
            warning,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitUploadResponse {
    pub batch_id: String,
    pub task_ids: Vec<String>,
    pub warnings: Vec<WarningResponse>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Whether this request flipped the cancellation flag.
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub task_id: String,
    pub retried: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start uploading a batch of files.
pub async fn submit_upload(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitUploadBody>,
) -> Result<(StatusCode, Json<SubmitUploadResponse>), ApiError> {
    let handle = state.uploads().submit(body.paths).await?;
    info!(
        "Accepted upload batch {} with {} task(s)",
        handle.batch_id,
        handle.task_ids.len()
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitUploadResponse {
            batch_id: handle.batch_id,
            task_ids: handle.task_ids,
            warnings: handle.warnings.into_iter().map(WarningResponse::from).collect(),
        }),
    ))
}

/// Current batch progress.
pub async fn get_progress(State(state): State<Arc<AppState>>) -> Json<ProgressSnapshot> {
    Json(state.uploads().current().snapshot())
}

pub async fn cancel_upload(State(state): State<Arc<AppState>>) -> Json<CancelResponse> {
    let cancelled = state.uploads().cancel().await;
    Json(CancelResponse { cancelled })
}

pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    state.uploads().retry(&task_id).await?;
    Ok(Json(RetryResponse {
        task_id,
        retried: true,
    }))
}

/// Discard a settled batch.
pub async fn clear_results(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.uploads().clear_results().await?;
    Ok(StatusCode::NO_CONTENT)
}
