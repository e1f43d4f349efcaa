use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by handlers. Each variant maps to one HTTP status.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Duplicate bill not allowed. This bill already exists. Please upload a different bill.")]
    DuplicateBill,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Too many requests, try again later")]
    RateLimited,

    #[error("Error processing file")]
    Processing(#[source] anyhow::Error),

    #[error("{0}")]
    Storage(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Internal server error")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn processing(err: impl Into<anyhow::Error>) -> Self {
        AppError::Processing(err.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::QuotaExceeded(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::DuplicateBill => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Processing(_)
            | AppError::Storage(_)
            | AppError::Internal(_)
            | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Detail attached under `error` in the response body.
    fn detail(&self) -> Option<String> {
        match self {
            AppError::Processing(e) | AppError::Internal(e) => Some(format!("{:#}", e)),
            AppError::Database(e) => Some(e.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        let body = match self.detail() {
            Some(detail) => json!({ "message": self.to_string(), "error": detail }),
            None => json!({ "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
