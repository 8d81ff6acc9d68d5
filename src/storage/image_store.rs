//! File storage for generated images

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::schema::ImageInfo;

const PNG_EXTENSION: &str = "png";

/// A PNG written by [`ImageStore::save_generated`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub filename: String,
    pub path: PathBuf,
}

/// Flat directory of generated PNG files
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the file holding an image generated at `timestamp` with `seed`
    pub fn generated_filename(timestamp: i64, seed: u32) -> String {
        format!("generated_{}_{}.{}", timestamp, seed, PNG_EXTENSION)
    }

    /// Ensure the storage directory exists
    pub async fn ensure_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.dir).await? {
            fs::create_dir_all(&self.dir).await?;
            debug!(path = ?self.dir, "Created image directory");
        }
        Ok(())
    }

    /// Write PNG bytes for a generated image
    pub async fn save_generated(&self, png: &[u8], seed: u32) -> Result<StoredImage> {
        self.ensure_dir().await?;

        let filename = Self::generated_filename(chrono::Utc::now().timestamp(), seed);
        let path = self.dir.join(&filename);
        fs::write(&path, png).await?;

        debug!(path = ?path, size = png.len(), "Saved image file");

        Ok(StoredImage { filename, path })
    }

    /// Resolve a client supplied filename inside the directory.
    ///
    /// Names that could escape the directory resolve to nothing.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty()
            || filename.contains(|c: char| c == '/' || c == '\\')
            || filename == "."
            || filename == ".."
        {
            return None;
        }
        Some(self.dir.join(filename))
    }

    /// Read an image file
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self
            .resolve(filename)
            .ok_or_else(|| AppError::ImageNotFound(filename.to_string()))?;

        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::ImageNotFound(filename.to_string()))
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// List PNG files in storage, newest first
    pub async fn list(&self) -> Result<Vec<ImageInfo>> {
        let mut images = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(images),
            Err(e) => return Err(AppError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_png = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(PNG_EXTENSION))
                .unwrap_or(false);
            if !is_png {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(epoch_seconds)
                .unwrap_or(0.0);

            images.push(ImageInfo {
                filename: entry.file_name().to_string_lossy().to_string(),
                path: path.to_string_lossy().to_string(),
                size: metadata.len(),
                created,
            });
        }

        images.sort_by(|a, b| {
            b.created
                .total_cmp(&a.created)
                .then_with(|| b.filename.cmp(&a.filename))
        });

        Ok(images)
    }
}

fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
