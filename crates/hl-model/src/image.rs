//! Text-to-image generation behind a provider trait.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;

use crate::chat::ModelError;

// ---------------------------------------------------------------------------
// ImageModel trait
// ---------------------------------------------------------------------------

/// Async trait for image-generation providers. Returns raw PNG bytes.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str) -> Result<Vec<u8>, ModelError>;
}

// ---------------------------------------------------------------------------
// OpenAiImageModel
// ---------------------------------------------------------------------------

/// Image provider for the OpenAI Images API (`/v1/images/generations`).
pub struct OpenAiImageModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiImageModel {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
        }
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

#[async_trait]
impl ImageModel for OpenAiImageModel {
    async fn generate(&self, prompt: &str, model: &str) -> Result<Vec<u8>, ModelError> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });

        let url = format!("{}/v1/images/generations", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();

        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(ModelError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status,
                message: text,
            });
        }

        let api_resp: ImagesResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::ParseError(e.to_string()))?;

        let b64 = api_resp
            .data
            .first()
            .and_then(|d| d.b64_json.as_deref())
            .ok_or_else(|| ModelError::ParseError("no image in response".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| ModelError::ParseError(format!("invalid image base64: {e}")))
    }
}

// ---------------------------------------------------------------------------
// MockImageModel
// ---------------------------------------------------------------------------

/// A mock image model that records every prompt and returns queued results
/// (or a tiny placeholder PNG once the queue is empty).
pub struct MockImageModel {
    results: Arc<Mutex<VecDeque<Result<Vec<u8>, ModelError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockImageModel {
    pub fn new() -> Self {
        Self {
            results: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_result(self, result: Result<Vec<u8>, ModelError>) -> Self {
        self.results.lock().unwrap().push_back(result);
        self
    }

    /// Every prompt this mock has been asked to render.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn placeholder_png() -> Vec<u8> {
        // PNG magic bytes are enough for the pipeline, which never decodes.
        vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
    }
}

impl Default for MockImageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageModel for MockImageModel {
    async fn generate(&self, prompt: &str, _model: &str) -> Result<Vec<u8>, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(Self::placeholder_png()),
        }
    }
}
