//! TOML configuration file loading
//!
//! Supports `~/.config/snuggles/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ResponseMode;
use crate::voice::Sensitivity;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SnugglesConfigFile {
    /// Live session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,

    /// Voice activity detection
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Sample rates and scheduling
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Persona and memory context
    #[serde(default)]
    pub persona: PersonaFileConfig,

    /// Text-to-speech fallback
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Ordered candidate models, first preferred
    pub models: Option<Vec<String>>,

    /// Prebuilt voice name (e.g. "Charon")
    pub voice: Option<String>,

    /// "audio" or "text"
    pub response_mode: Option<ResponseMode>,

    /// Request transcription of user speech
    pub input_transcription: Option<bool>,

    /// Request transcription of model speech
    pub output_transcription: Option<bool>,

    /// Per-send timeout in milliseconds
    pub send_timeout_ms: Option<u64>,

    /// Override the realtime endpoint URL
    pub endpoint: Option<String>,
}

/// Reconnect policy configuration
#[derive(Debug, Default, Deserialize)]
pub struct ReconnectFileConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter_ms: Option<u64>,
}

/// VAD configuration; explicit values override the sensitivity preset
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    pub sensitivity: Option<Sensitivity>,
    pub rms_threshold: Option<f32>,
    pub min_speech_frames: Option<u32>,
    pub min_silence_frames: Option<u32>,
    pub zcr_threshold: Option<f32>,
    pub barge_in_multiplier: Option<f32>,
}

/// Audio rates and playback scheduling
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub wire_input_rate: Option<u32>,
    pub wire_output_rate: Option<u32>,
    pub playback_rate: Option<u32>,
    pub capture_block_size: Option<usize>,
    pub safety_margin_ms: Option<u64>,
    pub drift_threshold_ms: Option<u64>,
}

/// Persona configuration
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    /// Path to a persona prompt file (markdown allowed, stripped before send)
    pub prompt_file: Option<String>,
    /// Extra knowledge appended to the instruction
    pub knowledge: Option<String>,
    /// Summaries of earlier sessions
    pub session_summaries: Option<Vec<String>>,
    pub comedy: Option<u8>,
    pub research: Option<u8>,
    pub energy: Option<u8>,
}

/// ElevenLabs TTS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file
///
/// With an explicit path, a missing or malformed file is an error. Without
/// one, the standard location is tried and any problem falls back to defaults.
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<SnugglesConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let parsed = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(parsed);
    }

    let Some(path) = config_file_path() else {
        return Ok(SnugglesConfigFile::default());
    };

    if !path.exists() {
        return Ok(SnugglesConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(SnugglesConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(SnugglesConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/snuggles/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("snuggles").join("config.toml"))
}
