//! Image generation service: model lifecycle and the generate operation

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::ModelConfig;
use crate::pipeline::{PipelineInfo, PipelineLoader, PipelineParams};
use crate::schema::GenerationRequest;
use crate::service::worker::{GenerationWorker, WorkerError};
use crate::storage::ImageStore;

/// Lifecycle of the model behind the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    /// No usable model; carries the error of the last failed load
    Unloaded { last_error: Option<String> },
    Ready,
}

/// Artifact of a successful generation
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub message: String,
    pub path: PathBuf,
    pub filename: String,
    pub seed: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    ModelNotLoaded,
    QueueFull,
    Pipeline,
    Storage,
}

/// Why a generation produced no image
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
    /// Time spent up to the failure
    pub elapsed: Duration,
}

impl GenerationError {
    fn model_not_loaded() -> Self {
        Self {
            kind: GenerationErrorKind::ModelNotLoaded,
            message: "Model not loaded".to_string(),
            elapsed: Duration::ZERO,
        }
    }
}

pub type GenerationOutcome = std::result::Result<GeneratedImage, GenerationError>;

/// Owns the loaded pipeline and runs generations against it
pub struct ImageGenerationService {
    loader: Arc<dyn PipelineLoader>,
    model: ModelConfig,
    store: Arc<ImageStore>,
    queue_capacity: usize,
    worker: OnceLock<GenerationWorker>,
    last_error: RwLock<Option<String>>,
    load_lock: Mutex<()>,
}

impl ImageGenerationService {
    pub fn new(
        loader: Arc<dyn PipelineLoader>,
        model: ModelConfig,
        store: Arc<ImageStore>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            loader,
            model,
            store,
            queue_capacity,
            worker: OnceLock::new(),
            last_error: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    /// Load the configured model and start the worker.
    ///
    /// Returns `false` on failure; the service then stays unloaded. Calling
    /// this again once loaded is a no-op.
    pub async fn load_model(&self) -> bool {
        let _guard = self.load_lock.lock().await;
        if self.worker.get().is_some() {
            return true;
        }

        let started = Instant::now();
        info!(model = %self.model.name, device = %self.model.device, dtype = %self.model.dtype, "Loading model");

        let pipeline = match self.loader.load(&self.model).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(model = %self.model.name, error = %format!("{:#}", e), "Error loading model");
                *self.last_error.write() = Some(format!("{:#}", e));
                return false;
            }
        };

        let worker = match GenerationWorker::spawn(pipeline, self.queue_capacity) {
            Ok(worker) => worker,
            Err(e) => {
                error!(error = %e, "Failed to start generation worker");
                *self.last_error.write() = Some(e.to_string());
                return false;
            }
        };

        let loaded = worker.info().clone();
        // Guarded by load_lock, so the cell is still empty here
        let _ = self.worker.set(worker);
        *self.last_error.write() = None;

        info!(
            model = %loaded.model,
            device = %loaded.device,
            dtype = %loaded.dtype,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Model loaded successfully"
        );
        true
    }

    pub fn is_model_loaded(&self) -> bool {
        self.worker.get().is_some()
    }

    pub fn state(&self) -> ServiceState {
        if self.is_model_loaded() {
            ServiceState::Ready
        } else {
            ServiceState::Unloaded {
                last_error: self.last_error.read().clone(),
            }
        }
    }

    /// Device and precision the model actually runs with
    pub fn pipeline_info(&self) -> Option<PipelineInfo> {
        self.worker.get().map(|w| w.info().clone())
    }

    /// Generate one image and write it to the image store
    pub async fn generate_image(&self, request: &GenerationRequest) -> GenerationOutcome {
        let Some(worker) = self.worker.get() else {
            return Err(GenerationError::model_not_loaded());
        };

        let started = Instant::now();
        let seed = request.seed().unwrap_or_else(rand::random::<u32>);
        let params = PipelineParams::from_request(request, seed);

        info!(
            seed = seed,
            steps = params.num_inference_steps,
            width = params.width,
            height = params.height,
            guidance_scale = params.guidance_scale,
            queued = worker.queued(),
            "Generating image"
        );

        let png = match worker.submit(params).await {
            Ok(png) => png,
            Err(WorkerError::QueueFull) => {
                warn!(seed = seed, "Generation queue is full");
                return Err(GenerationError {
                    kind: GenerationErrorKind::QueueFull,
                    message: "Generation queue is full".to_string(),
                    elapsed: started.elapsed(),
                });
            }
            Err(e) => {
                let detail = match &e {
                    WorkerError::Pipeline(inner) => format!("{:#}", inner),
                    other => other.to_string(),
                };
                error!(seed = seed, error = %detail, "Error generating image");
                return Err(GenerationError {
                    kind: GenerationErrorKind::Pipeline,
                    message: format!("Error generating image: {}", detail),
                    elapsed: started.elapsed(),
                });
            }
        };

        let stored = match self.store.save_generated(&png, seed).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(seed = seed, error = %e, "Error saving image");
                return Err(GenerationError {
                    kind: GenerationErrorKind::Storage,
                    message: format!("Error generating image: {}", e),
                    elapsed: started.elapsed(),
                });
            }
        };

        let elapsed = started.elapsed();
        info!(
            seed = seed,
            path = ?stored.path,
            elapsed_secs = elapsed.as_secs_f64(),
            "Image generated successfully"
        );

        Ok(GeneratedImage {
            message: "Image generated successfully".to_string(),
            path: stored.path,
            filename: stored.filename,
            seed,
            elapsed,
        })
    }
}
