//! Pipeline module - Diffusion pipeline traits, device selection and implementations

pub mod device;
pub mod mock;
pub mod stable_diffusion;

use async_trait::async_trait;
use image::DynamicImage;
use std::io::Cursor;

use crate::config::ModelConfig;
use crate::schema::GenerationRequest;

pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionPipeline};

/// Sampling parameters handed to a pipeline, with the seed already resolved
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub width: usize,
    pub height: usize,
    pub seed: u32,
}

impl PipelineParams {
    pub fn from_request(request: &GenerationRequest, seed: u32) -> Self {
        Self {
            prompt: request.prompt().to_string(),
            negative_prompt: request.negative_prompt().map(String::from),
            num_inference_steps: request.num_inference_steps() as usize,
            guidance_scale: request.guidance_scale(),
            width: request.width() as usize,
            height: request.height() as usize,
            seed,
        }
    }
}

/// Where a loaded pipeline ended up running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInfo {
    pub model: String,
    pub device: String,
    pub dtype: String,
}

/// A loaded text-to-image pipeline.
///
/// Implementations are owned by a single worker thread, so `generate` takes
/// `&mut self` and only needs `Send`.
pub trait DiffusionPipeline: Send {
    fn info(&self) -> PipelineInfo;

    /// Run the full sampling process for one image
    fn generate(&mut self, params: &PipelineParams) -> anyhow::Result<DynamicImage>;
}

/// Builds a pipeline from model configuration
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn load(&self, config: &ModelConfig) -> anyhow::Result<Box<dyn DiffusionPipeline>>;
}

/// Encode an image as PNG bytes
pub fn encode_png(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}
