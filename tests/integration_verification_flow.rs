use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use kyc_verify::config::Config;
use kyc_verify::models::session::ImageRef;
use kyc_verify::repositories::session::MemorySessionStore;
use kyc_verify::routes;
use kyc_verify::services::ocr::OcrEngine;
use kyc_verify::state::AppState;

const FRONT_TEXT: &str = "REPUBLICA DE CHILE\nCEDULA DE IDENTIDAD\n\
    APELLIDOS\nGONZALEZ\nPEREZ\nNOMBRES\nJUAN CARLOS\n\
    NACIONALIDAD\nCHILENA\nSEXO\nM\n\
    FECHA DE NACIMIENTO\n15 MAR 1985\n\
    NUMERO DOCUMENTO\n500.123.456\n\
    RUN 12.345.678-5\n";

const BACK_TEXT: &str = "NACIO EN: SANTIAGO\nPROFESION: MEDICO VETERINARIO\n\
    INCHL500123456712345678<5<<<<<\n\
    8503152M3001017CHL12345678<5<3\n\
    GONZALEZ<PEREZ<<JUAN<CARLOS<<<\n";

struct ScriptedOcr(HashMap<&'static str, &'static str>);

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn extract_text(&self, image: &ImageRef) -> anyhow::Result<String> {
        Ok(self.0.get(image.as_str()).copied().unwrap_or_default().to_string())
    }
}

fn test_app() -> Router {
    let ocr = Arc::new(ScriptedOcr(HashMap::from([
        ("front.jpg", FRONT_TEXT),
        ("back.jpg", BACK_TEXT),
    ])));
    let state = AppState::with_parts(
        Config::in_memory("http://ocr.invalid"),
        Arc::new(MemorySessionStore::new()),
        ocr,
        None,
        None,
    );
    routes::app(state)
}

fn embedding() -> Value {
    let values: Vec<f32> = (0..128).map(|i| ((i as f32) * 0.41).cos()).collect();
    json!(values)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn start(app: &Router) -> String {
    let (status, body) = send(app, "POST", "/api/verification/start", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "PENDING_DOCUMENT_FRONT");
    assert_eq!(body["nextStep"], "document_front");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn full_verification_over_http() {
    let app = test_app();
    let id = start(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/verification/{}/front", id),
        Some(json!({ "imageRef": "front.jpg", "idCardEmbedding": embedding() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING_DOCUMENT_BACK");
    assert_eq!(body["extractedRut"], "123456785");
    assert_eq!(body["extractedName"], "JUAN CARLOS GONZALEZ PEREZ");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/verification/{}/back", id),
        Some(json!({ "imageRef": "back.jpg" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING_LIVENESS");
    assert_eq!(body["accepted"], true);
    assert_eq!(body["signals"]["hasMrz"], true);
    assert_eq!(body["signals"]["mrzStrategy"], "anchor");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/verification/{}/selfie", id),
        Some(json!({
            "imageRef": "selfie.jpg",
            "liveness": 0.9,
            "faceMatch": 0.97,
            "embedding": embedding(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "VERIFIED");
    assert_eq!(body["faceMatchSource"], "server");
    assert_eq!(body["flaggedForReview"], false);

    let (status, body) = send(&app, "GET", &format!("/api/verification/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "VERIFIED");
    assert!(body["nextStep"].is_null());
    assert!((body["scores"]["liveness"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    assert!(body["createdAt"].is_string());
    assert!(body["updatedAt"].is_string());
}

#[tokio::test]
async fn rejected_back_then_workflow_conflict() {
    let app = test_app();
    let id = start(&app).await;

    send(
        &app,
        "POST",
        &format!("/api/verification/{}/front", id),
        Some(json!({ "imageRef": "front.jpg" })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/verification/{}/back", id),
        Some(json!({ "imageRef": "front.jpg" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "REJECTED_DOC");
    assert_eq!(body["accepted"], false);
    assert!(body["signals"].is_object());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/verification/{}/selfie", id),
        Some(json!({ "imageRef": "selfie.jpg", "liveness": 0.9, "faceMatch": 0.9 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn invalid_input_and_unknown_sessions() {
    let app = test_app();
    let id = start(&app).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/verification/{}/selfie", id),
        Some(json!({ "imageRef": "selfie.jpg", "liveness": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/verification/{}/front", id),
        Some(json!({ "imageRef": "front.jpg", "idCardEmbedding": [0.1, 0.2] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "GET",
        "/api/verification/6a1f7d0e-7a5b-4c55-9a59-2f1f0b7c9e11",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Resource not found");
}

#[tokio::test]
async fn start_accepts_a_bare_post() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/verification/start")
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "PENDING_DOCUMENT_FRONT");

    let (status, body) = send(
        &app,
        "POST",
        "/api/verification/start",
        Some(json!({ "userId": "6a1f7d0e-7a5b-4c55-9a59-2f1f0b7c9e11" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["nextStep"], "document_front");
}
