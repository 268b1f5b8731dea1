use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::merger::MergeError;
use crate::utils::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
        } else {
            AppError::MalformedUpload(e.body_text())
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Io(_) | AppError::Merge(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Validation(e) => {
                tracing::info!("Rejected upload: {}", e);
                e.to_string()
            }
            AppError::MalformedUpload(msg) => msg,
            AppError::PayloadTooLarge(msg) => msg,
            AppError::Io(e) => {
                tracing::error!("Spooling error: {:?}", e);
                "Internal Server Error".to_string()
            }
            AppError::Merge(e) => {
                tracing::error!("Merge error: {:?}", e);
                "Internal Server Error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal Server Error".to_string()
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
