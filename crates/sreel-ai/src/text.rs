//! Text-understanding adapter.
//!
//! Speaks a Gemini-shaped JSON API: a `contents`/`parts` request with
//! `responseMimeType: application/json`, and a `candidates` response
//! whose first part carries the model's JSON as text.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{status_error, AiError, AiResult};

/// Capability: turn prose into entity-graph JSON.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Analyze `text` under `prompt`; returns the model's JSON value.
    async fn analyze(&self, prompt: &str, text: &str) -> AiResult<serde_json::Value>;
}

/// Configuration for the hosted text model.
#[derive(Debug, Clone)]
pub struct TextModelConfig {
    /// Base URL of the generative API
    pub base_url: String,
    /// Model name inserted into the request path
    pub model: String,
    /// API key sent as a query parameter
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl TextModelConfig {
    /// Create config from environment variables.
    pub fn from_env() -> AiResult<Self> {
        let api_key = std::env::var("TEXT_MODEL_API_KEY")
            .map_err(|_| AiError::config("TEXT_MODEL_API_KEY not set"))?;
        Ok(Self {
            base_url: std::env::var("TEXT_MODEL_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
            model: std::env::var("TEXT_MODEL_NAME")
                .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            api_key,
            timeout: Duration::from_secs(
                std::env::var("TEXT_MODEL_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

/// Hosted text-understanding model.
pub struct GeminiTextModel {
    config: TextModelConfig,
    client: Client,
}

impl GeminiTextModel {
    pub fn new(config: TextModelConfig) -> AiResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> AiResult<Self> {
        Self::new(TextModelConfig::from_env()?)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.config.api_key
        )
    }
}

#[async_trait]
impl TextModel for GeminiTextModel {
    async fn analyze(&self, prompt: &str, text: &str) -> AiResult<serde_json::Value> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: format!("{}\n\n{}", prompt, text),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        debug!(model = %self.config.model, chars = text.len(), "text analysis request");

        let response = self.client.post(self.endpoint()).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::malformed(format!("response is not candidate JSON: {}", e)))?;

        let raw = body
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| AiError::malformed("response has no candidates"))?;

        serde_json::from_str(raw)
            .map_err(|e| AiError::malformed(format!("candidate text is not JSON: {}", e)))
    }
}
