//! Generation and image file endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::API_PREFIX;
use crate::error::{AppError, Result};
use crate::schema::{
    GenerateParams, GenerationRequest, GenerationResponse, ImageListResponse, RequestLimits,
};
use crate::service::GenerationErrorKind;
use crate::AppState;

/// Generate an image from a prompt
pub async fn generate(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<GenerateParams>, JsonRejection>,
) -> Result<Json<GenerationResponse>> {
    if !state.image_service.is_model_loaded() {
        return Err(AppError::ModelNotLoaded);
    }

    let Json(params) = body?;
    let limits = RequestLimits::from(&state.settings.generation);
    let request = GenerationRequest::new(params, &limits).map_err(|e| {
        debug!(error = %e, "Rejected generation request");
        AppError::Validation(e)
    })?;

    match state.image_service.generate_image(&request).await {
        Ok(image) => {
            let url_prefix = format!("{}/image", API_PREFIX);
            Ok(Json(GenerationResponse::from_generated(&image, &url_prefix)))
        }
        Err(e) => match e.kind {
            GenerationErrorKind::ModelNotLoaded => Err(AppError::ModelNotLoaded),
            GenerationErrorKind::QueueFull => Err(AppError::QueueFull),
            GenerationErrorKind::Pipeline | GenerationErrorKind::Storage => {
                Err(AppError::GenerationFailed(e.message))
            }
        },
    }
}

/// Serve a stored PNG
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let bytes = state.image_store.read(&filename).await.map_err(|e| {
        if matches!(e, AppError::ImageNotFound(_)) {
            debug!(filename = %filename, "Image not found");
        } else {
            warn!(filename = %filename, error = %e, "Failed to read image");
        }
        e
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// List stored PNGs, newest first
pub async fn list_images(State(state): State<Arc<AppState>>) -> Result<Json<ImageListResponse>> {
    let images = state.image_store.list().await?;
    Ok(Json(ImageListResponse { images }))
}
