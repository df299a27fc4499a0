//! Mapping of core errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use invoicer_core::{ExportError, RepositoryError, SubmitWarning, UploadError};

/// Error body returned by every handler.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Handler error carrying the status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    warnings: Vec<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn with_warnings(mut self, warnings: &[SubmitWarning]) -> Self {
        self.warnings = warnings.iter().map(SubmitWarning::message).collect();
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        let body = ErrorResponse {
            error: self.message,
            warnings: self.warnings,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::EmptySelection | UploadError::NoValidFiles { .. } => {
                StatusCode::BAD_REQUEST
            }
            UploadError::UnknownTask(_) => StatusCode::NOT_FOUND,
            UploadError::BatchInProgress
            | UploadError::NoActiveBatch
            | UploadError::NotRetryable { .. }
            | UploadError::BatchCancelled
            | UploadError::State(_) => StatusCode::CONFLICT,
            UploadError::Limiter(_) | UploadError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let api = ApiError::new(status, err.to_string());
        match &err {
            UploadError::NoValidFiles { warnings } => api.with_warnings(warnings),
            _ => api,
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        let status = match &err {
            ExportError::EmptySelection => StatusCode::BAD_REQUEST,
            ExportError::Packaging(_) | ExportError::Sink(_) | ExportError::Limiter(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        let status = match &err {
            RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
            RepositoryError::Validation(_) | RepositoryError::Rejected(_) => {
                StatusCode::BAD_REQUEST
            }
            RepositoryError::Duplicate { .. } => StatusCode::CONFLICT,
            RepositoryError::Network(_) | RepositoryError::Timeout(_) | RepositoryError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_upload_error_statuses() {
        assert_eq!(
            ApiError::from(UploadError::EmptySelection).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(UploadError::UnknownTask("t-1".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(UploadError::BatchInProgress).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(UploadError::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_no_valid_files_keeps_warnings() {
        let err = ApiError::from(UploadError::NoValidFiles {
            warnings: vec![SubmitWarning::MissingFile {
                paths: vec![PathBuf::from("/nope.pdf")],
            }],
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.warnings.len(), 1);
    }

    #[test]
    fn test_repository_error_statuses() {
        assert_eq!(
            ApiError::from(RepositoryError::NotFound("inv-1".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RepositoryError::Duplicate { existing_id: None }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(RepositoryError::Network("reset".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
