//! Storage module - Generated image files

pub mod image_store;

pub use image_store::{ImageStore, StoredImage};
