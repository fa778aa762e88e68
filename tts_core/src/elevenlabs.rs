use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use thiserror::Error;

pub use reqwest::StatusCode;

/// Longest slice of an upstream error body kept for logging
const MAX_ERROR_BODY: usize = 512;

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("ELEVENLABS_API_KEY is not set")]
    MissingApiKey,

    #[error("TTS request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("TTS service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Turns one line of text into compressed audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: Option<String>,
    pub voice_id: String,
    pub base_url: String,
    pub model_id: Option<String>,
    pub stability: f32,
    pub similarity_boost: f32,
    pub timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: DEFAULT_VOICE_ID.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id: None,
            stability: 0.5,
            similarity_boost: 0.75,
            timeout_secs: 60,
        }
    }
}

impl ElevenLabsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let voice_id = std::env::var("ELEVENLABS_VOICE_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.voice_id);

        let base_url = std::env::var("ELEVENLABS_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.base_url);

        let model_id = std::env::var("ELEVENLABS_MODEL_ID")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let stability = std::env::var("ELEVENLABS_STABILITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.stability);

        let similarity_boost = std::env::var("ELEVENLABS_SIMILARITY_BOOST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.similarity_boost);

        let timeout_secs = std::env::var("ELEVENLABS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Self {
            api_key,
            voice_id,
            base_url,
            model_id,
            stability,
            similarity_boost,
            timeout_secs,
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<&'a str>,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

pub struct ElevenLabsClient {
    client: Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsClient {
    pub fn new(config: ElevenLabsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(SynthesisError::MissingApiKey)?;

        let body = SpeechRequest {
            text,
            model_id: self.config.model_id.as_deref(),
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", api_key)
            .header(header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(SynthesisError::Status { status, body });
        }

        let audio = response.bytes().await?;
        tracing::debug!("Synthesized {} chars into {} bytes", text.chars().count(), audio.len());
        Ok(audio.to_vec())
    }
}
