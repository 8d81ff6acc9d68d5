//! Stable Diffusion pipeline backed by candle

use anyhow::{bail, Context, Error, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use image::DynamicImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::pipeline::device::{describe_device, select_device, Precision};
use crate::pipeline::{DiffusionPipeline, PipelineInfo, PipelineLoader, PipelineParams};

/// Supported Stable Diffusion architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdVersion {
    V1_5,
    V2_1,
}

impl SdVersion {
    /// Detect the architecture from a hub model identifier
    pub fn from_model_name(model_name: &str) -> Result<Self> {
        let name = model_name.to_lowercase();

        if name.contains("xl") || name.contains("turbo") || name.contains("flux") {
            bail!("Unsupported model architecture: {}", model_name);
        }
        if name.contains("2-1") || name.contains("2.1") || name.contains("diffusion-2") {
            return Ok(Self::V2_1);
        }
        Ok(Self::V1_5)
    }

    fn config(self, sliced_attention_size: Option<usize>) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(sliced_attention_size, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(sliced_attention_size, None, None),
        }
    }

    fn tokenizer_repo(self) -> &'static str {
        "openai/clip-vit-base-patch32"
    }

    fn vae_scale(self) -> f64 {
        0.18215
    }
}

/// Hub file names of the pipeline components
fn weight_file(component: &str, half: bool) -> String {
    let stem = match component {
        "text_encoder" => "model",
        _ => "diffusion_pytorch_model",
    };
    if half {
        format!("{}/{}.fp16.safetensors", component, stem)
    } else {
        format!("{}/{}.safetensors", component, stem)
    }
}

/// Loaded Stable Diffusion components
pub struct StableDiffusionPipeline {
    model_name: String,
    version: SdVersion,
    device: Device,
    precision: Precision,
    sd_config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusionPipeline {
    fn build(
        model_name: String,
        version: SdVersion,
        device: Device,
        precision: Precision,
        sliced_attention_size: Option<usize>,
        files: &WeightFiles,
    ) -> Result<Self> {
        let sd_config = version.config(sliced_attention_size);
        let dtype = precision.dtype();

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = sd_config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .with_context(|| format!("tokenizer has no padding token {}", pad_token))?;

        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            &files.text_encoder,
            &device,
            DType::F32,
        )
        .context("failed to build CLIP text encoder")?;
        let vae = sd_config
            .build_vae(&files.vae, &device, dtype)
            .context("failed to build VAE")?;
        let unet = sd_config
            .build_unet(&files.unet, &device, 4, false, dtype)
            .context("failed to build UNet")?;

        Ok(Self {
            model_name,
            version,
            device,
            precision,
            sd_config,
            tokenizer,
            pad_id,
            text_model,
            unet,
            vae,
        })
    }

    /// Token ids for a prompt, truncated or padded to the CLIP context length
    fn tokenize(&self, text: &str) -> Result<Tensor> {
        let max_len = self.sd_config.clip.max_position_embeddings;
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        tokens.truncate(max_len);
        tokens.resize(max_len, self.pad_id);
        Ok(Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?)
    }

    fn text_embeddings(&self, params: &PipelineParams, use_guidance: bool) -> Result<Tensor> {
        let dtype = self.precision.dtype();
        let cond = self.text_model.forward(&self.tokenize(&params.prompt)?)?;
        if !use_guidance {
            return Ok(cond.to_dtype(dtype)?);
        }

        let negative = params.negative_prompt.as_deref().unwrap_or("");
        let uncond = self.text_model.forward(&self.tokenize(negative)?)?;
        Ok(Tensor::cat(&[uncond, cond], 0)?.to_dtype(dtype)?)
    }

    /// Initial latents drawn from an RNG seeded only by the request seed
    fn initial_latents(&self, params: &PipelineParams, init_noise_sigma: f64) -> Result<Tensor> {
        let shape = (1, 4, params.height / 8, params.width / 8);
        let len = 4 * (params.height / 8) * (params.width / 8);

        let mut rng = StdRng::seed_from_u64(u64::from(params.seed));
        let noise: Vec<f32> = (0..len).map(|_| rng.sample(StandardNormal)).collect();

        let latents = Tensor::from_vec(noise, shape, &Device::Cpu)?.to_device(&self.device)?;
        Ok((latents * init_noise_sigma)?.to_dtype(self.precision.dtype())?)
    }
}

impl DiffusionPipeline for StableDiffusionPipeline {
    fn info(&self) -> PipelineInfo {
        PipelineInfo {
            model: self.model_name.clone(),
            device: describe_device(&self.device),
            dtype: self.precision.to_string(),
        }
    }

    fn generate(&mut self, params: &PipelineParams) -> Result<DynamicImage> {
        if params.width % 8 != 0 || params.height % 8 != 0 {
            bail!("image dimensions must be multiples of 8");
        }

        let use_guidance = params.guidance_scale > 1.0;
        let text_embeddings = self.text_embeddings(params, use_guidance)?;

        let mut scheduler = self.sd_config.build_scheduler(params.num_inference_steps)?;
        let timesteps = scheduler.timesteps().to_vec();
        let mut latents = self.initial_latents(params, scheduler.init_noise_sigma())?;

        for (index, &timestep) in timesteps.iter().enumerate() {
            let started = Instant::now();
            let model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;

            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, cond) = (&chunks[0], &chunks[1]);
                (uncond + ((cond - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };

            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(
                step = index + 1,
                total = timesteps.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Sampling step done"
            );
        }

        let decoded = self.vae.decode(&(&latents / self.version.vae_scale())?)?;
        let decoded = ((decoded / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let pixels = (decoded.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?;

        tensor_to_image(&pixels.i(0)?)
    }
}

/// Converts a tensor with shape (3, height, width) into an RGB image
fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        bail!("expected an image tensor with 3 channels, got {}", channels);
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .context("error converting tensor to image buffer")?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

struct WeightFiles {
    tokenizer: PathBuf,
    text_encoder: PathBuf,
    unet: PathBuf,
    vae: PathBuf,
}

/// Loads Stable Diffusion weights from the Hugging Face hub
#[derive(Debug, Default, Clone)]
pub struct StableDiffusionLoader;

impl StableDiffusionLoader {
    pub fn new() -> Self {
        Self
    }

    fn api(cache_dir: Option<&str>) -> Result<Api> {
        let mut builder = ApiBuilder::new();
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(Path::new(dir).to_path_buf());
        }
        builder.build().context("failed to create hub client")
    }

    async fn fetch(api: &Api, model: &str, version: SdVersion, half: bool) -> Result<WeightFiles> {
        let tokenizer = api
            .model(version.tokenizer_repo().to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get tokenizer")?;

        let repo = api.model(model.to_string());
        Ok(WeightFiles {
            tokenizer,
            text_encoder: Self::fetch_component(&repo, "text_encoder", half).await?,
            unet: Self::fetch_component(&repo, "unet", half).await?,
            vae: Self::fetch_component(&repo, "vae", half).await?,
        })
    }

    async fn fetch_component(repo: &ApiRepo, component: &str, half: bool) -> Result<PathBuf> {
        let name = weight_file(component, half);
        debug!(file = %name, "Fetching weights");
        repo.get(&name)
            .await
            .with_context(|| format!("failed to get {} weights ({})", component, name))
    }
}

#[async_trait]
impl PipelineLoader for StableDiffusionLoader {
    async fn load(&self, config: &ModelConfig) -> Result<Box<dyn DiffusionPipeline>> {
        let version = SdVersion::from_model_name(&config.name)?;
        let device = select_device(config.device_selector()?);
        let precision = config.precision()?.effective_for(&device);

        info!(
            model = %config.name,
            version = ?version,
            device = %describe_device(&device),
            dtype = %precision,
            "Fetching model weights"
        );

        let api = Self::api(config.cache_dir.as_deref())?;
        let files = Self::fetch(&api, &config.name, version, precision.is_half()).await?;

        let model_name = config.name.clone();
        let sliced_attention_size = config.attention_slice_size;
        let pipeline = tokio::task::spawn_blocking(move || {
            StableDiffusionPipeline::build(
                model_name,
                version,
                device,
                precision,
                sliced_attention_size,
                &files,
            )
        })
        .await
        .context("model build task failed")??;

        Ok(Box::new(pipeline))
    }
}
