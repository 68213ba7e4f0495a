//! Image-synthesis adapter.
//!
//! JSON POST in, base64-in-JSON out; the adapter decodes to raw PNG
//! bytes so callers never see provider encoding.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{status_error, AiError, AiResult};

/// Capability: prompt in, image bytes out.
#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Generate one image; `size` is `WxH`, `seed` is best-effort.
    async fn generate(&self, prompt: &str, size: &str, seed: Option<u64>) -> AiResult<Vec<u8>>;
}

/// Configuration for the hosted image model.
#[derive(Debug, Clone)]
pub struct ImageModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ImageModelConfig {
    /// Create config from environment variables.
    pub fn from_env() -> AiResult<Self> {
        let api_key = std::env::var("IMAGE_MODEL_API_KEY")
            .map_err(|_| AiError::config("IMAGE_MODEL_API_KEY not set"))?;
        Ok(Self {
            base_url: std::env::var("IMAGE_MODEL_URL")
                .unwrap_or_else(|_| "https://api.imagegen.example.com/v1".to_string()),
            api_key,
            timeout: Duration::from_secs(
                std::env::var("IMAGE_MODEL_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: String,
}

/// Hosted image-synthesis model.
pub struct HttpImageModel {
    config: ImageModelConfig,
    client: Client,
}

impl HttpImageModel {
    pub fn new(config: ImageModelConfig) -> AiResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> AiResult<Self> {
        Self::new(ImageModelConfig::from_env()?)
    }
}

#[async_trait]
impl ImageModel for HttpImageModel {
    async fn generate(&self, prompt: &str, size: &str, seed: Option<u64>) -> AiResult<Vec<u8>> {
        let url = format!("{}/images/generations", self.config.base_url);
        debug!(size, seed, "image synthesis request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&ImageRequest { prompt, size, seed })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| AiError::malformed(format!("image response is not JSON: {}", e)))?;

        let datum = body
            .data
            .first()
            .ok_or_else(|| AiError::malformed("image response has no data entries"))?;

        base64::engine::general_purpose::STANDARD
            .decode(&datum.b64_json)
            .map_err(|e| AiError::malformed(format!("image payload is not valid base64: {}", e)))
    }
}
