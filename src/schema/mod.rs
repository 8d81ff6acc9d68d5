//! Request validation and response shapes for the HTTP API

pub mod request;
pub mod response;

pub use request::{
    FieldViolation, GenerateParams, GenerationRequest, RequestLimits, ValidationErrors,
    ViolationKind,
};
pub use response::{
    GenerationResponse, HealthResponse, ImageInfo, ImageListResponse, ReadinessResponse,
    RootResponse, StatusResponse,
};
