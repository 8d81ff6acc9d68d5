//! Shared helpers for integration tests

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request},
    response::Response,
    Router,
};
use sd_image_service::{
    api::routes::create_router, config::Settings, pipeline::mock::MockLoader, AppState,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Router backed by the mock pipeline and a temporary image directory
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub loader: MockLoader,
    _tmp: TempDir,
}

impl TestApp {
    /// App whose model has not been loaded yet
    pub fn unloaded(loader: MockLoader) -> Self {
        Self::with_queue_capacity(loader, 4)
    }

    /// Unloaded app whose generation queue holds `capacity` waiting jobs
    pub fn with_queue_capacity(loader: MockLoader, capacity: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.storage.root = tmp.path().to_string_lossy().to_string();
        settings.storage.images_dir = "images".to_string();
        settings.generation.queue_capacity = capacity;

        let state = Arc::new(AppState::new(settings, Arc::new(loader.clone())));
        let router = create_router(state.clone());

        Self {
            router,
            state,
            loader,
            _tmp: tmp,
        }
    }

    /// App with the mock model loaded
    pub async fn loaded(loader: MockLoader) -> Self {
        let app = Self::unloaded(loader);
        assert!(app.state.image_service.load_model().await);
        app
    }

    pub fn images_dir(&self) -> PathBuf {
        self.state.image_store.dir().to_path_buf()
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
