//! Deterministic stand-in pipeline for tests and dry runs.
//!
//! Image content is a pure function of the seed and sampling parameters, so
//! identical requests produce byte-identical PNGs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::pipeline::{DiffusionPipeline, PipelineInfo, PipelineLoader, PipelineParams};

/// Counters shared between a mock loader, its pipeline and the test observing them
#[derive(Debug, Default)]
pub struct MockProbe {
    loads: AtomicUsize,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockProbe {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of generations observed running at the same time
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Pipeline that paints a seeded gradient instead of sampling a model
pub struct MockPipeline {
    model: String,
    delay: Duration,
    fail_with: Option<String>,
    probe: Arc<MockProbe>,
}

impl DiffusionPipeline for MockPipeline {
    fn info(&self) -> PipelineInfo {
        PipelineInfo {
            model: self.model.clone(),
            device: "cpu".to_string(),
            dtype: "float32".to_string(),
        }
    }

    fn generate(&mut self, params: &PipelineParams) -> Result<DynamicImage> {
        let probe = &self.probe;
        probe.calls.fetch_add(1, Ordering::SeqCst);
        let active = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        probe.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = match &self.fail_with {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(render(params)),
        };

        probe.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn render(params: &PipelineParams) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(u64::from(params.seed));
    let base: [u8; 3] = rng.gen();
    let tint = (params.num_inference_steps as u32)
        .wrapping_add(params.guidance_scale.to_bits() as u32)
        .wrapping_add(params.prompt.bytes().map(u32::from).sum::<u32>());

    let (width, height) = (params.width as u32, params.height as u32);
    let image = RgbImage::from_fn(width, height, |x, y| {
        let fx = (x * 255 / width.max(1)) as u8;
        let fy = (y * 255 / height.max(1)) as u8;
        Rgb([
            base[0].wrapping_add(fx),
            base[1].wrapping_add(fy),
            base[2].wrapping_add(tint as u8),
        ])
    });
    DynamicImage::ImageRgb8(image)
}

/// Loader producing a [`MockPipeline`]
#[derive(Debug, Clone, Default)]
pub struct MockLoader {
    delay: Duration,
    load_error: Option<String>,
    generation_error: Option<String>,
    probe: Arc<MockProbe>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every generation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_load(mut self, message: impl Into<String>) -> Self {
        self.load_error = Some(message.into());
        self
    }

    pub fn failing_generation(mut self, message: impl Into<String>) -> Self {
        self.generation_error = Some(message.into());
        self
    }

    pub fn probe(&self) -> Arc<MockProbe> {
        self.probe.clone()
    }
}

#[async_trait]
impl PipelineLoader for MockLoader {
    async fn load(&self, config: &ModelConfig) -> Result<Box<dyn DiffusionPipeline>> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.load_error {
            return Err(anyhow!("{}", message));
        }

        Ok(Box::new(MockPipeline {
            model: config.name.clone(),
            delay: self.delay,
            fail_with: self.generation_error.clone(),
            probe: self.probe.clone(),
        }))
    }
}
