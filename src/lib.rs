//! Stable Diffusion Image Service
//!
//! HTTP service that turns text prompts into PNG images with a locally loaded
//! diffusion pipeline, stores them on disk and serves them back.

pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod schema;
pub mod service;
pub mod storage;

pub use error::{AppError, Result};

use std::sync::Arc;

use config::Settings;
use pipeline::PipelineLoader;
use service::ImageGenerationService;
use storage::ImageStore;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub image_service: Arc<ImageGenerationService>,
    pub image_store: Arc<ImageStore>,
}

impl AppState {
    /// Wire the store and generation service from settings.
    ///
    /// The model is not loaded here; call
    /// [`ImageGenerationService::load_model`] once the server is up.
    pub fn new(settings: Settings, loader: Arc<dyn PipelineLoader>) -> Self {
        let image_store = Arc::new(ImageStore::new(settings.storage.images_path()));
        let image_service = Arc::new(ImageGenerationService::new(
            loader,
            settings.model.clone(),
            image_store.clone(),
            settings.generation.queue_capacity,
        ));

        Self {
            settings: Arc::new(settings),
            image_service,
            image_store,
        }
    }
}
