//! # API Error Types
//!
//! Unified error handling for the REST layer. Every error renders as
//! `{"error": {"message": ..., "code": ...}}` with a matching status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use grade_integration::RemoteError;
use grade_persistence::PersistenceError;
use grade_service::GradeError;

/// API-level errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Grade(#[from] GradeError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid UUID format: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get HTTP status code for this error
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Grade(err) => match err {
                GradeError::EntityNotFound { .. } | GradeError::GradeNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                GradeError::DuplicateGrade { .. } => StatusCode::CONFLICT,
                GradeError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                GradeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                GradeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidInput(_) | Self::InvalidUuid(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Grade(err) => match err {
                GradeError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
                GradeError::GradeNotFound(_) => "GRADE_NOT_FOUND",
                GradeError::DuplicateGrade { .. } => "DUPLICATE_GRADE",
                GradeError::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
                GradeError::InvalidInput(_) => "INVALID_INPUT",
                GradeError::Storage(_) => "STORAGE_ERROR",
            },
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidUuid(_) => "INVALID_UUID",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        }

        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "code": self.error_code(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure while wiring the service at startup
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Primary store unavailable: {0}")]
    Store(#[from] PersistenceError),

    #[error("Remote client misconfigured: {0}")]
    RemoteClient(#[from] RemoteError),
}
