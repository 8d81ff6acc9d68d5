//! Service module - Model lifecycle and serialized generation

pub mod generation;
pub mod worker;

pub use generation::{
    GeneratedImage, GenerationError, GenerationErrorKind, GenerationOutcome,
    ImageGenerationService, ServiceState,
};
