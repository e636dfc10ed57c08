//! Server-side face-embedding collaborator.
//!
//! Optional per deployment: the engine is checked once at startup and injected
//! as `Option<Arc<dyn FaceEngine>>`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;

use crate::models::session::ImageRef;

#[async_trait]
pub trait FaceEngine: Send + Sync {
    /// The face embedding for `image`, or `None` when no face was detected.
    async fn extract_embedding(&self, image: &ImageRef) -> Result<Option<Vec<f32>>>;
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

/// Face engine behind an HTTP endpoint (`POST {base}/embed`).
pub struct HttpFaceEngine {
    client: Client,
    base_url: String,
}

impl HttpFaceEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl FaceEngine for HttpFaceEngine {
    async fn extract_embedding(&self, image: &ImageRef) -> Result<Option<Vec<f32>>> {
        let body = sonic_rs::to_string(&sonic_rs::json!({ "image_ref": image.as_str() }))
            .context("Failed to encode embedding request")?;

        let resp = self
            .client
            .post(format!("{}/embed", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("Face engine request failed")?
            .error_for_status()
            .context("Face engine returned an error status")?;

        let bytes = resp.bytes().await.context("Failed to read face engine response")?;
        let parsed: EmbedResponse =
            sonic_rs::from_slice(&bytes).context("Face engine response is not valid JSON")?;

        Ok(parsed.embedding.filter(|e| !e.is_empty()))
    }
}
