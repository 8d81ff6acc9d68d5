//! Application settings and configuration management

use crate::error::{AppError, Result};
use crate::pipeline::device::{DeviceSelector, Precision};
use crate::schema::request::{
    MIN_DIMENSION, MAX_GUIDANCE_SCALE, MAX_STEPS, MIN_GUIDANCE_SCALE, MIN_STEPS,
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment variable overrides, e.g. `SD_API__MODEL__DEVICE=cpu`
pub const ENV_PREFIX: &str = "SD_API";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
    #[serde(default)]
    pub debug: bool,
}

fn default_app_name() -> String {
    "Stable Diffusion API".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            debug: false,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Filesystem root that relative paths resolve against
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
}

fn default_root() -> String {
    ".".to_string()
}

fn default_images_dir() -> String {
    "generated-images".to_string()
}

impl StorageConfig {
    /// Directory generated images are written to
    pub fn images_path(&self) -> PathBuf {
        let images_dir = Path::new(&self.images_dir);
        if images_dir.is_absolute() {
            images_dir.to_path_buf()
        } else {
            Path::new(&self.root).join(images_dir)
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            images_dir: default_images_dir(),
        }
    }
}

/// Diffusion model configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Hugging Face hub identifier of the model repository
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Numeric precision: float16, bfloat16 or float32
    #[serde(default = "default_dtype")]
    pub dtype: String,
    /// Compute device: cpu, cuda, cuda:N or metal
    #[serde(default = "default_device")]
    pub device: String,
    /// Override for the hub download cache
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub attention_slice_size: Option<usize>,
}

fn default_model_name() -> String {
    "stable-diffusion-v1-5/stable-diffusion-v1-5".to_string()
}

fn default_dtype() -> String {
    "float16".to_string()
}

fn default_device() -> String {
    "cuda".to_string()
}

impl ModelConfig {
    pub fn precision(&self) -> Result<Precision> {
        self.dtype
            .parse()
            .map_err(|e: String| AppError::Config(config::ConfigError::Message(e)))
    }

    pub fn device_selector(&self) -> Result<DeviceSelector> {
        self.device
            .parse()
            .map_err(|e: String| AppError::Config(config::ConfigError::Message(e)))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dtype: default_dtype(),
            device: default_device(),
            cache_dir: None,
            attention_slice_size: None,
        }
    }
}

/// Request limits, sampling defaults and queueing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u32,
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    #[serde(default = "default_steps")]
    pub default_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub default_guidance_scale: f64,
    #[serde(default = "default_dimension")]
    pub default_width: u32,
    #[serde(default = "default_dimension")]
    pub default_height: u32,
    /// Generation jobs allowed to wait behind the one being sampled
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_image_size() -> u32 {
    1024
}

fn default_max_prompt_length() -> usize {
    500
}

fn default_steps() -> u32 {
    50
}

fn default_guidance_scale() -> f64 {
    7.5
}

fn default_dimension() -> u32 {
    512
}

fn default_queue_capacity() -> usize {
    8
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_image_size: default_max_image_size(),
            max_prompt_length: default_max_prompt_length(),
            default_steps: default_steps(),
            default_guidance_scale: default_guidance_scale(),
            default_width: default_dimension(),
            default_height: default_dimension(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load settings from `.env`, the default configuration file and environment variables
    pub fn load() -> Result<Self> {
        env_file_loaded(dotenvy::dotenv().map(|_| ()))?;
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_str().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Configuration path is not valid UTF-8".to_string(),
            ))
        })?;

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("model.name", default_model_name())?
            .set_default("model.dtype", default_dtype())?
            .set_default("model.device", default_device())?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }

        if self.model.name.trim().is_empty() {
            return Err(invalid("Model name cannot be empty"));
        }
        self.model.precision()?;
        self.model.device_selector()?;

        let generation = &self.generation;
        if generation.max_image_size < MIN_DIMENSION
            || generation.max_image_size > 1024
            || generation.max_image_size % 8 != 0
        {
            return Err(invalid(format!(
                "max_image_size {} must be a multiple of 8 between {} and 1024",
                generation.max_image_size, MIN_DIMENSION
            )));
        }
        if generation.max_prompt_length == 0 {
            return Err(invalid("max_prompt_length must be positive"));
        }
        if !(MIN_STEPS..=MAX_STEPS).contains(&generation.default_steps) {
            return Err(invalid(format!(
                "default_steps {} must be between {} and {}",
                generation.default_steps, MIN_STEPS, MAX_STEPS
            )));
        }
        if !(MIN_GUIDANCE_SCALE..=MAX_GUIDANCE_SCALE).contains(&generation.default_guidance_scale)
        {
            return Err(invalid(format!(
                "default_guidance_scale {} must be between {} and {}",
                generation.default_guidance_scale, MIN_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE
            )));
        }
        for (name, value) in [
            ("default_width", generation.default_width),
            ("default_height", generation.default_height),
        ] {
            if value < MIN_DIMENSION || value > generation.max_image_size || value % 8 != 0 {
                return Err(invalid(format!(
                    "{} {} must be a multiple of 8 between {} and {}",
                    name, value, MIN_DIMENSION, generation.max_image_size
                )));
            }
        }
        if generation.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1"));
        }

        Ok(())
    }

    /// Filter directive used when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &str {
        if self.app.debug {
            "debug"
        } else {
            &self.logging.level
        }
    }
}

/// A missing `.env` file is fine; one that cannot be read or parsed is not
fn env_file_loaded(result: std::result::Result<(), dotenvy::Error>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(invalid(format!("Failed to load .env file: {}", e))),
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::Config(config::ConfigError::Message(message.into()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            model: ModelConfig::default(),
            generation: GenerationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
