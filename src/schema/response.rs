//! Response bodies returned by the HTTP API

use serde::{Deserialize, Serialize};

use crate::service::GeneratedImage;

/// Result of a successful generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub success: bool,
    pub message: String,
    pub image_path: Option<String>,
    /// Wall-clock seconds spent generating and saving
    pub generation_time: f64,
    pub seed_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl GenerationResponse {
    /// Build the response for a generated image; `url_prefix` is the image route prefix
    pub fn from_generated(image: &GeneratedImage, url_prefix: &str) -> Self {
        Self {
            success: true,
            message: image.message.clone(),
            image_path: Some(image.path.to_string_lossy().to_string()),
            generation_time: image.elapsed.as_secs_f64(),
            seed_used: Some(image.seed),
            filename: Some(image.filename.clone()),
            image_url: Some(format!("{}/{}", url_prefix.trim_end_matches('/'), image.filename)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessResponse {
    pub fn ready() -> Self {
        Self {
            status: "ready".to_string(),
            reason: None,
        }
    }

    pub fn not_ready(reason: &str) -> Self {
        Self {
            status: "not_ready".to_string(),
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Service metadata served at `/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub health: String,
}

/// A stored image as reported by the listing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub filename: String,
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// Seconds since the Unix epoch
    pub created: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageInfo>,
}
