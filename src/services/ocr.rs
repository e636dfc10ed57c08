//! OCR collaborator: image in, best-effort raw text out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;

use crate::models::session::ImageRef;

/// Turns an image into raw UTF-8 text.
///
/// An unreadable image yields an empty string, not an error; errors mean the
/// engine itself could not be reached.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &ImageRef) -> Result<String>;
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: String,
}

/// OCR engine behind an HTTP endpoint (`POST {base}/ocr`).
pub struct HttpOcrEngine {
    client: Client,
    base_url: String,
}

impl HttpOcrEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn extract_text(&self, image: &ImageRef) -> Result<String> {
        let body = sonic_rs::to_string(&sonic_rs::json!({ "image_ref": image.as_str() }))
            .context("Failed to encode OCR request")?;

        let resp = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("OCR request failed")?
            .error_for_status()
            .context("OCR service returned an error status")?;

        let bytes = resp.bytes().await.context("Failed to read OCR response")?;
        let parsed: OcrResponse =
            sonic_rs::from_slice(&bytes).context("OCR response is not valid JSON")?;

        tracing::debug!(image = %image, chars = parsed.text.len(), "📄 OCR text received");
        Ok(parsed.text)
    }
}
