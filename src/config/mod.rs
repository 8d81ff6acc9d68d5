//! Configuration module

pub mod settings;

pub use settings::{
    AppConfig, GenerationConfig, LoggingConfig, ModelConfig, ServerConfig, Settings,
    StorageConfig,
};
