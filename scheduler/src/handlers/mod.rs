pub mod health;
pub mod jobs;
pub mod metrics;
pub mod status;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use common::errors::JobError;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub trace_id: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl From<JobError> for ErrorResponse {
    fn from(err: JobError) -> Self {
        match &err {
            JobError::Validation(_) => ErrorResponse::new("validation_error", err.to_string()),
            JobError::NotFound { .. } => ErrorResponse::new("not_found", err.to_string()),
            JobError::Database(_) => {
                tracing::error!(error = %err, "Job table operation failed");
                ErrorResponse::new("database_error", err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        ErrorResponse::new("validation_error", rejection.body_text())
    }
}

impl From<QueryRejection> for ErrorResponse {
    fn from(rejection: QueryRejection) -> Self {
        ErrorResponse::new("validation_error", rejection.body_text())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.error.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "validation_error" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}
