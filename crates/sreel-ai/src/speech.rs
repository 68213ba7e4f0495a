//! Speech-synthesis adapter.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{status_error, AiError, AiResult};

/// Audio container requested from the speech endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    #[default]
    Mp3,
    Wav,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Mp3 => "mp3",
            AudioEncoding::Wav => "wav",
        }
    }

    /// File extension for blobs of this encoding.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

/// Capability: text + voice in, audio bytes out.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed_ratio: f64,
        encoding: AudioEncoding,
    ) -> AiResult<Vec<u8>>;
}

/// Configuration for the hosted speech model.
#[derive(Debug, Clone)]
pub struct SpeechModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl SpeechModelConfig {
    /// Create config from environment variables.
    pub fn from_env() -> AiResult<Self> {
        let api_key = std::env::var("SPEECH_MODEL_API_KEY")
            .map_err(|_| AiError::config("SPEECH_MODEL_API_KEY not set"))?;
        Ok(Self {
            base_url: std::env::var("SPEECH_MODEL_URL")
                .unwrap_or_else(|_| "https://api.speech.example.com/v1".to_string()),
            api_key,
            timeout: Duration::from_secs(
                std::env::var("SPEECH_MODEL_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
    speed: f64,
    encoding: &'a str,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    audio: String,
}

/// Hosted speech-synthesis model.
pub struct HttpSpeechModel {
    config: SpeechModelConfig,
    client: Client,
}

impl HttpSpeechModel {
    pub fn new(config: SpeechModelConfig) -> AiResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> AiResult<Self> {
        Self::new(SpeechModelConfig::from_env()?)
    }
}

#[async_trait]
impl SpeechModel for HttpSpeechModel {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed_ratio: f64,
        encoding: AudioEncoding,
    ) -> AiResult<Vec<u8>> {
        let url = format!("{}/speech/synthesize", self.config.base_url);
        debug!(voice = voice_id, chars = text.len(), "speech synthesis request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&SpeechRequest {
                text,
                voice: voice_id,
                speed: speed_ratio,
                encoding: encoding.as_str(),
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: SpeechResponse = response
            .json()
            .await
            .map_err(|e| AiError::malformed(format!("speech response is not JSON: {}", e)))?;

        base64::engine::general_purpose::STANDARD
            .decode(&body.audio)
            .map_err(|e| AiError::malformed(format!("audio payload is not valid base64: {}", e)))
    }
}
