//! Service metadata and probe endpoints

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::API_PREFIX;
use crate::schema::{HealthResponse, ReadinessResponse, RootResponse, StatusResponse};
use crate::AppState;

pub async fn root(State(state): State<Arc<AppState>>) -> Json<RootResponse> {
    let app = &state.settings.app;
    Json(RootResponse {
        message: format!("Welcome to {}", app.name),
        version: app.version.clone(),
        health: format!("{}/health", API_PREFIX),
    })
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.settings.app.version.clone(),
        model_loaded: state.image_service.is_model_loaded(),
    })
}

/// Readiness is reported in the body; the status code is always 200
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadinessResponse> {
    if state.image_service.is_model_loaded() {
        Json(ReadinessResponse::ready())
    } else {
        Json(ReadinessResponse::not_ready("model_not_loaded"))
    }
}

pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}
