//! Unit tests for request validation and error bodies

use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
use sd_image_service::config::GenerationConfig;
use sd_image_service::schema::{GenerateParams, GenerationRequest, RequestLimits, ViolationKind};
use sd_image_service::AppError;

fn params(width: i64, height: i64, steps: i64, guidance: f64) -> GenerateParams {
    GenerateParams {
        width: Some(width),
        height: Some(height),
        num_inference_steps: Some(steps),
        guidance_scale: Some(guidance),
        ..GenerateParams::new("a red cube")
    }
}

#[test]
fn test_all_aligned_dimensions_accepted() {
    let limits = RequestLimits::default();
    for width in (256..=1024).step_by(8) {
        let height = 1280 - width;
        let request = GenerationRequest::new(params(width, height.max(256), 30, 7.5), &limits);
        assert!(request.is_ok(), "{}x{} should be valid", width, height.max(256));
    }
}

#[test]
fn test_unaligned_dimensions_rejected() {
    let limits = RequestLimits::default();
    for width in (257..1024).filter(|w| w % 8 != 0) {
        let err = GenerationRequest::new(params(width, 512, 30, 7.5), &limits).unwrap_err();
        assert!(err.has("width", ViolationKind::NotMultipleOfEight));
        assert!(err.is_dimension_alignment());
    }
}

#[test]
fn test_dimensions_out_of_range_rejected() {
    let limits = RequestLimits::default();
    for height in [0, 8, 248, 1032, 2048] {
        let err = GenerationRequest::new(params(512, height, 30, 7.5), &limits).unwrap_err();
        assert!(err.has("height", ViolationKind::OutOfRange));
    }
}

#[test]
fn test_step_range() {
    let limits = RequestLimits::default();
    for steps in 1..=100 {
        assert!(GenerationRequest::new(params(512, 512, steps, 7.5), &limits).is_ok());
    }
    for steps in [-1, 0, 101, 1000] {
        let err = GenerationRequest::new(params(512, 512, steps, 7.5), &limits).unwrap_err();
        assert!(err.has("num_inference_steps", ViolationKind::OutOfRange));
    }
}

#[test]
fn test_guidance_range() {
    let limits = RequestLimits::default();
    for guidance in [1.0, 1.5, 7.5, 12.25, 20.0] {
        assert!(GenerationRequest::new(params(512, 512, 30, guidance), &limits).is_ok());
    }
    for guidance in [0.0, 0.99, 20.01, f64::NAN] {
        let err = GenerationRequest::new(params(512, 512, 30, guidance), &limits).unwrap_err();
        assert!(err.has("guidance_scale", ViolationKind::OutOfRange));
    }
}

#[test]
fn test_seed_range() {
    let limits = RequestLimits::default();
    let with_seed = |seed: i64| GenerateParams {
        seed: Some(seed),
        ..GenerateParams::new("a red cube")
    };

    let request = GenerationRequest::new(with_seed(i64::from(u32::MAX)), &limits).unwrap();
    assert_eq!(request.seed(), Some(u32::MAX));
    assert_eq!(
        GenerationRequest::new(with_seed(0), &limits).unwrap().seed(),
        Some(0)
    );

    for seed in [-1, i64::from(u32::MAX) + 1] {
        let err = GenerationRequest::new(with_seed(seed), &limits).unwrap_err();
        assert!(err.has("seed", ViolationKind::OutOfRange));
    }
}

#[test]
fn test_prompt_length_follows_config() {
    let config = GenerationConfig {
        max_prompt_length: 10,
        ..GenerationConfig::default()
    };
    let limits = RequestLimits::from(&config);

    assert!(GenerationRequest::new(GenerateParams::new("0123456789"), &limits).is_ok());
    let err = GenerationRequest::new(GenerateParams::new("0123456789a"), &limits).unwrap_err();
    assert!(err.has("prompt", ViolationKind::TooLong));
}

#[test]
fn test_smaller_max_image_size() {
    let config = GenerationConfig {
        max_image_size: 768,
        ..GenerationConfig::default()
    };
    let limits = RequestLimits::from(&config);

    assert!(GenerationRequest::new(params(768, 768, 30, 7.5), &limits).is_ok());
    let err = GenerationRequest::new(params(1024, 768, 30, 7.5), &limits).unwrap_err();
    assert!(err.has("width", ViolationKind::OutOfRange));
}

#[tokio::test]
async fn test_validation_error_body() {
    let err = GenerationRequest::new(params(500, 512, 0, 7.5), &RequestLimits::default())
        .unwrap_err();

    let response = AppError::from(err).into_response();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["code"], "validation_failed");

    let details = body["error"]["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    assert!(details
        .iter()
        .any(|d| d["field"] == "width" && d["kind"] == "not_multiple_of_eight"));
    assert!(details
        .iter()
        .any(|d| d["field"] == "num_inference_steps" && d["kind"] == "out_of_range"));
}

#[tokio::test]
async fn test_unavailable_error_body() {
    let response = AppError::ModelNotLoaded.into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "model_not_loaded");
    assert!(body["error"].get("details").is_none());
}
