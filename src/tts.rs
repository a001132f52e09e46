//! Text-to-speech fallback
//!
//! Used when the live session answers in text: assistant turns are voiced
//! through an HTTP TTS service and the returned MP3 goes to the playback
//! scheduler's encoded path.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::TtsConfig;
use crate::{Error, Result};

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// Encoding requested from the service
const OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Synthesizes speech from text
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text`, returning an encoded audio container (MP3)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// `ElevenLabs` HTTP client
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: SecretString,
    voice_id: String,
    model_id: String,
    base_url: String,
}

impl ElevenLabsTts {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API key or voice id is missing
    pub fn new(api_key: Option<SecretString>, config: &TtsConfig) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("ElevenLabs API key required for TTS".to_string()))?;
        let voice_id = config
            .voice_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Config("ElevenLabs voice id required for TTS".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            model_id: config.model_id.clone(),
            base_url: ELEVENLABS_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
        }

        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        if text.trim().is_empty() {
            return Err(Error::Tts("nothing to synthesize".to_string()));
        }

        let url = format!("{}/text-to-speech/{}", self.base_url, self.voice_id);
        let request = ElevenLabsRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("output_format", OUTPUT_FORMAT)])
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(
            chars = text.len(),
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "speech synthesized"
        );
        Ok(audio.to_vec())
    }
}
