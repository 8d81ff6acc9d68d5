//! Functional tests for the generate endpoint

#[path = "../support/mod.rs"]
mod support;

use axum::http::StatusCode;
use sd_image_service::pipeline::mock::MockLoader;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use support::{body_bytes, body_json, get, post_json, TestApp};
use tower::ServiceExt;

fn red_cube(seed: u32) -> serde_json::Value {
    json!({
        "prompt": "a red cube",
        "width": 512,
        "height": 512,
        "num_inference_steps": 10,
        "seed": seed
    })
}

#[tokio::test]
async fn test_generate_with_seed() {
    let app = TestApp::loaded(MockLoader::new()).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/v1/generate", &red_cube(42)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["seed_used"], 42);
    assert_eq!(body["message"], "Image generated successfully");
    assert!(body["generation_time"].as_f64().unwrap() >= 0.0);

    let image_path = body["image_path"].as_str().unwrap();
    let filename = Path::new(image_path)
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(filename.starts_with("generated_"));
    assert!(filename.ends_with("_42.png"));
    assert!(Path::new(image_path).exists());
    assert!(Path::new(image_path).starts_with(app.images_dir()));

    assert_eq!(body["filename"], filename.as_str());
    assert_eq!(body["image_url"], format!("/api/v1/image/{}", filename));
}

#[tokio::test]
async fn test_generate_before_load_is_unavailable() {
    let app = TestApp::unloaded(MockLoader::new());

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/v1/generate", &red_cube(42)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "model_not_loaded");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Model not loaded"));
    assert_eq!(app.loader.probe().calls(), 0);
}

#[tokio::test]
async fn test_generate_uses_defaults() {
    let app = TestApp::loaded(MockLoader::new()).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/v1/generate", &json!({ "prompt": "a quiet harbor" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let image_path = body["image_path"].as_str().unwrap();
    let png = std::fs::read(image_path).unwrap();
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (512, 512));
}

#[tokio::test]
async fn test_unaligned_dimension_rejected() {
    let app = TestApp::loaded(MockLoader::new()).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/v1/generate",
            &json!({ "prompt": "a red cube", "width": 500 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "validation_failed");
    let details = body["error"]["details"].as_array().unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0]["field"], "width");
    assert_eq!(details[0]["kind"], "not_multiple_of_eight");
    assert_eq!(app.loader.probe().calls(), 0);
}

#[tokio::test]
async fn test_out_of_range_fields_rejected() {
    let app = TestApp::loaded(MockLoader::new()).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/v1/generate",
            &json!({
                "prompt": "",
                "num_inference_steps": 0,
                "guidance_scale": 25.0,
                "height": 2048
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    let fields: Vec<&str> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"prompt"));
    assert!(fields.contains(&"num_inference_steps"));
    assert!(fields.contains(&"guidance_scale"));
    assert!(fields.contains(&"height"));
}

#[tokio::test]
async fn test_missing_prompt_rejected() {
    let app = TestApp::loaded(MockLoader::new()).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/v1/generate", &json!({ "width": 512 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_wrongly_typed_body_rejected() {
    let app = TestApp::loaded(MockLoader::new()).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/v1/generate",
            &json!({ "prompt": "a red cube", "width": "wide" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_body");
}

#[tokio::test]
async fn test_pipeline_failure_is_500() {
    let app = TestApp::loaded(MockLoader::new().failing_generation("CUDA out of memory")).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/v1/generate", &red_cube(7)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "generation_failed");
    assert_eq!(
        body["error"]["message"],
        "Error generating image: CUDA out of memory"
    );
}

#[tokio::test]
async fn test_same_seed_same_bytes() {
    let app = TestApp::loaded(MockLoader::new()).await;

    let mut images = Vec::new();
    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/v1/generate", &red_cube(1234)))
            .await
            .unwrap();
        let body = body_json(response).await;
        images.push(std::fs::read(body["image_path"].as_str().unwrap()).unwrap());
    }

    assert_eq!(images[0], images[1]);
}

#[tokio::test]
async fn test_random_seed_when_absent() {
    let app = TestApp::loaded(MockLoader::new()).await;
    let request = json!({ "prompt": "a red cube", "width": 256, "height": 256 });

    let mut seeds = Vec::new();
    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/v1/generate", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let seed = body_json(response).await["seed_used"].as_u64().unwrap();
        assert!(seed <= u64::from(u32::MAX));
        seeds.push(seed);
    }

    assert_ne!(seeds[0], seeds[1]);
}

#[tokio::test]
async fn test_health_answers_during_generation() {
    let app = TestApp::loaded(MockLoader::new().with_delay(Duration::from_millis(500))).await;

    let generation = tokio::spawn(
        app.router
            .clone()
            .oneshot(post_json("/api/v1/generate", &red_cube(9))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let health = tokio::time::timeout(
        Duration::from_millis(200),
        app.router.clone().oneshot(get("/api/v1/health")),
    )
    .await
    .expect("health check blocked by generation")
    .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert!(!generation.is_finished());

    let response = generation.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_concurrent_generations_serialize() {
    let loader = MockLoader::new().with_delay(Duration::from_millis(50));
    let probe = loader.probe();
    let app = TestApp::loaded(loader).await;

    let requests = (0..4u32).map(|seed| {
        app.router
            .clone()
            .oneshot(post_json("/api/v1/generate", &red_cube(seed)))
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let _ = body_bytes(response).await;
    }
    assert_eq!(probe.calls(), 4);
    assert_eq!(probe.max_active(), 1);
}

#[tokio::test]
async fn test_storage_failure_is_500() {
    let app = TestApp::loaded(MockLoader::new()).await;
    std::fs::write(app.images_dir(), b"not a directory").unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/v1/generate", &red_cube(8)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "generation_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Error generating image: "));
}

#[tokio::test]
async fn test_full_queue_is_unavailable() {
    let app = TestApp::with_queue_capacity(
        MockLoader::new().with_delay(Duration::from_millis(400)),
        1,
    );
    assert!(app.state.image_service.load_model().await);

    // One job sampling, one waiting, the third is turned away
    let running = tokio::spawn(
        app.router
            .clone()
            .oneshot(post_json("/api/v1/generate", &red_cube(1))),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    let waiting = tokio::spawn(
        app.router
            .clone()
            .oneshot(post_json("/api/v1/generate", &red_cube(2))),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/v1/generate", &red_cube(3)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "queue_full");

    assert_eq!(running.await.unwrap().unwrap().status(), StatusCode::OK);
    assert_eq!(waiting.await.unwrap().unwrap().status(), StatusCode::OK);
}
