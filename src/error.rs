//! Common error types for the image generation service

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::schema::request::{FieldViolation, ValidationErrors};

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("Model not loaded. Please wait for the service to initialize.")]
    ModelNotLoaded,

    #[error("Generation queue is full, retry later")]
    QueueFull,

    #[error("{0}")]
    GenerationFailed(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldViolation>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::InvalidBody(rejection) => (rejection.status(), "invalid_request_error", Some("invalid_body")),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request_error", Some("validation_failed")),
            AppError::ModelNotLoaded => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("model_not_loaded")),
            AppError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("queue_full")),
            AppError::GenerationFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "generation_error", Some("generation_failed")),
            AppError::ImageNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("image_not_found")),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let details = match &self {
            AppError::Validation(errors) => Some(errors.violations().to_vec()),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
                details,
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
