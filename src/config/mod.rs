//! Configuration management for the voice assistant
//!
//! Values are resolved in three layers: built-in defaults, the TOML config
//! file (see [`file`]), then environment variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::voice::{DEFAULT_DEVICE_RATE, VadConfig};
use crate::{Error, Result};

/// Default Gemini Live bidi-streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Candidate live models, most preferred first
pub const DEFAULT_MODELS: &[&str] = &[
    "gemini-2.5-flash-native-audio-preview-09-2025",
    "gemini-live-2.5-flash-preview",
    "gemini-2.0-flash-live-001",
];

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Charon";

/// Default ElevenLabs model
pub const DEFAULT_TTS_MODEL: &str = "eleven_monolingual_v1";

/// Assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Live session configuration
    pub session: SessionConfig,

    /// Reconnection policy inputs
    pub reconnect: ReconnectConfig,

    /// Voice activity detection
    pub vad: VadConfig,

    /// Sample rates and scheduling
    pub audio: AudioConfig,

    /// Persona and memory context
    pub persona: PersonaConfig,

    /// Text-to-speech fallback
    pub tts: TtsConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// How the remote model should answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Native audio responses
    #[default]
    Audio,
    /// Text responses, voiced locally through the TTS fallback
    Text,
}

impl ResponseMode {
    /// Wire name of the response modality
    #[must_use]
    pub const fn modality(self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
            Self::Text => "TEXT",
        }
    }
}

/// Live session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ordered fallback list of models; later entries are tried only when
    /// earlier ones are reported unavailable
    pub models: Vec<String>,

    /// Prebuilt voice name (audio mode only)
    pub voice: String,

    /// Response modality
    pub response_mode: ResponseMode,

    /// Request transcription of user speech
    pub input_transcription: bool,

    /// Request transcription of model speech
    pub output_transcription: bool,

    /// Upper bound on a single send before it counts as a connection error
    pub send_timeout: Duration,

    /// Realtime endpoint URL
    pub endpoint: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            models: DEFAULT_MODELS.iter().map(ToString::to_string).collect(),
            voice: DEFAULT_VOICE.to_string(),
            response_mode: ResponseMode::Audio,
            input_transcription: true,
            output_transcription: true,
            send_timeout: Duration::from_secs(5),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Reconnection policy inputs
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum reconnect attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Cap on the base delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub backoff_multiplier: f64,
    /// Total jitter width, applied symmetrically around the base delay
    pub jitter: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(500),
        }
    }
}

/// Sample rates and playback scheduling
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Rate the wire protocol expects for microphone audio
    pub wire_input_rate: u32,
    /// Rate of PCM audio coming back over the wire
    pub wire_output_rate: u32,
    /// Declared rate of buffers handed to the playback scheduler
    pub playback_rate: u32,
    /// Samples per captured frame
    pub capture_block_size: usize,
    /// Lead time before a newly scheduled segment may start
    pub safety_margin: Duration,
    /// How far behind the horizon may fall before it is reset
    pub drift_threshold: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            wire_input_rate: 16_000,
            wire_output_rate: 24_000,
            playback_rate: 48_000,
            capture_block_size: 960,
            safety_margin: Duration::from_millis(50),
            drift_threshold: Duration::from_millis(250),
        }
    }
}

/// Persona configuration
#[derive(Debug, Clone, Default)]
pub struct PersonaConfig {
    /// Persona prompt file; the built-in persona is used when absent
    pub prompt_file: Option<PathBuf>,
    /// Knowledge appended to the instruction
    pub knowledge: Option<String>,
    /// Summaries of earlier sessions
    pub session_summaries: Vec<String>,
    /// Personality mix, percentages
    pub personality: Option<PersonalityMix>,
}

/// Personality dial settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonalityMix {
    pub comedy: u8,
    pub research: u8,
    pub energy: u8,
}

/// ElevenLabs TTS configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Voice identifier
    pub voice_id: Option<String>,
    /// Model identifier
    pub model_id: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_id: None,
            model_id: DEFAULT_TTS_MODEL.to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Gemini API key
    pub gemini: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded or the
    /// resulting configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = file::load_config_file(path)?;
        let mut config = Self::from_file(file);
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from a parsed file over defaults
    #[must_use]
    pub fn from_file(file: file::SnugglesConfigFile) -> Self {
        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            models: file
                .session
                .models
                .filter(|m| !m.is_empty())
                .unwrap_or(session_defaults.models),
            voice: file.session.voice.unwrap_or(session_defaults.voice),
            response_mode: file
                .session
                .response_mode
                .unwrap_or(session_defaults.response_mode),
            input_transcription: file
                .session
                .input_transcription
                .unwrap_or(session_defaults.input_transcription),
            output_transcription: file
                .session
                .output_transcription
                .unwrap_or(session_defaults.output_transcription),
            send_timeout: file
                .session
                .send_timeout_ms
                .map_or(session_defaults.send_timeout, Duration::from_millis),
            endpoint: file.session.endpoint.unwrap_or(session_defaults.endpoint),
        };

        let rc = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            max_attempts: file.reconnect.max_attempts.unwrap_or(rc.max_attempts),
            initial_delay: file
                .reconnect
                .initial_delay_ms
                .map_or(rc.initial_delay, Duration::from_millis),
            max_delay: file
                .reconnect
                .max_delay_ms
                .map_or(rc.max_delay, Duration::from_millis),
            backoff_multiplier: file
                .reconnect
                .backoff_multiplier
                .unwrap_or(rc.backoff_multiplier),
            jitter: file.reconnect.jitter_ms.map_or(rc.jitter, Duration::from_millis),
        };

        let audio_defaults = AudioConfig::default();
        let audio = AudioConfig {
            wire_input_rate: file
                .audio
                .wire_input_rate
                .unwrap_or(audio_defaults.wire_input_rate),
            wire_output_rate: file
                .audio
                .wire_output_rate
                .unwrap_or(audio_defaults.wire_output_rate),
            playback_rate: file.audio.playback_rate.unwrap_or(audio_defaults.playback_rate),
            capture_block_size: file
                .audio
                .capture_block_size
                .unwrap_or(audio_defaults.capture_block_size),
            safety_margin: file
                .audio
                .safety_margin_ms
                .map_or(audio_defaults.safety_margin, Duration::from_millis),
            drift_threshold: file
                .audio
                .drift_threshold_ms
                .map_or(audio_defaults.drift_threshold, Duration::from_millis),
        };

        let mut vad = VadConfig::for_sensitivity(
            file.vad.sensitivity.unwrap_or_default(),
            DEFAULT_DEVICE_RATE,
        );
        if let Some(v) = file.vad.rms_threshold {
            vad.rms_threshold = v;
        }
        if let Some(v) = file.vad.min_speech_frames {
            vad.min_speech_frames = v;
        }
        if let Some(v) = file.vad.min_silence_frames {
            vad.min_silence_frames = v;
        }
        if let Some(v) = file.vad.zcr_threshold {
            vad.zcr_threshold = Some(v);
        }
        if let Some(v) = file.vad.barge_in_multiplier {
            vad.barge_in_multiplier = v;
        }

        let p = file.persona;
        let personality = match (p.comedy, p.research, p.energy) {
            (None, None, None) => None,
            (comedy, research, energy) => Some(PersonalityMix {
                comedy: comedy.unwrap_or(50),
                research: research.unwrap_or(50),
                energy: energy.unwrap_or(50),
            }),
        };
        let persona = PersonaConfig {
            prompt_file: p.prompt_file.map(|s| PathBuf::from(shellish_expand(&s))),
            knowledge: p.knowledge,
            session_summaries: p.session_summaries.unwrap_or_default(),
            personality,
        };

        let tts = TtsConfig {
            voice_id: file.tts.voice_id,
            model_id: file
                .tts
                .model_id
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
        };

        let api_keys = ApiKeys {
            gemini: file.api_keys.gemini.map(SecretString::from),
            elevenlabs: file.api_keys.elevenlabs.map(SecretString::from),
        };

        Self {
            session,
            reconnect,
            vad,
            audio,
            persona,
            tts,
            api_keys,
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) {
        if let Some(key) = non_empty_env("GEMINI_API_KEY") {
            self.api_keys.gemini = Some(SecretString::from(key));
        }
        if let Some(key) = non_empty_env("ELEVENLABS_API_KEY") {
            self.api_keys.elevenlabs = Some(SecretString::from(key));
        }
        if let Some(voice) = non_empty_env("ELEVENLABS_VOICE_ID") {
            self.tts.voice_id = Some(voice);
        }
        if let Some(model) = non_empty_env("SNUGGLES_MODEL") {
            // Promote to the front of the fallback list
            self.session.models.retain(|m| m != &model);
            self.session.models.insert(0, model);
        }
    }

    /// Check the configuration for values the pipeline cannot run with
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.session.models.is_empty() {
            return Err(Error::Config("session.models must not be empty".to_string()));
        }
        if self.audio.wire_input_rate == 0
            || self.audio.wire_output_rate == 0
            || self.audio.playback_rate == 0
        {
            return Err(Error::Config("audio sample rates must be non-zero".to_string()));
        }
        if self.audio.capture_block_size == 0 {
            return Err(Error::Config("audio.capture_block_size must be non-zero".to_string()));
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "reconnect.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.vad.min_speech_frames == 0 || self.vad.min_silence_frames == 0 {
            return Err(Error::Config("vad frame counts must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(file::SnugglesConfigFile::default())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Expand a leading `~/` to the home directory
fn shellish_expand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest).display().to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults_match_reconnect_surface() {
        let config = Config::default();
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert!((config.reconnect.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.reconnect.jitter, Duration::from_millis(500));
        assert_eq!(config.session.models[0], DEFAULT_MODELS[0]);
        assert_eq!(config.audio.wire_input_rate, 16_000);
        assert_eq!(config.audio.wire_output_rate, 24_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
            [session]
            models = ["model-a"]
            voice = "Kore"

            [reconnect]
            max_attempts = 3
            jitter_ms = 0

            [vad]
            sensitivity = "low"
            min_silence_frames = 8

            [persona]
            comedy = 80

            [api_keys]
            gemini = "from-file"
            "#
        )
        .unwrap();

        let file = file::load_config_file(Some(tmp.path())).unwrap();
        let config = Config::from_file(file);

        assert_eq!(config.session.models, vec!["model-a".to_string()]);
        assert_eq!(config.session.voice, "Kore");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.jitter, Duration::ZERO);
        assert!((config.vad.rms_threshold - 0.02).abs() < f32::EPSILON);
        assert_eq!(config.vad.min_speech_frames, 5);
        assert_eq!(config.vad.min_silence_frames, 8);
        assert_eq!(
            config.persona.personality,
            Some(PersonalityMix {
                comedy: 80,
                research: 50,
                energy: 50
            })
        );
        assert_eq!(
            config.api_keys.gemini.as_ref().map(ExposeSecret::expose_secret),
            Some("from-file")
        );
    }

    #[test]
    fn empty_model_list_falls_back_to_defaults() {
        let file: file::SnugglesConfigFile = toml::from_str("[session]\nmodels = []").unwrap();
        let config = Config::from_file(file);
        assert_eq!(config.session.models.len(), DEFAULT_MODELS.len());
    }

    #[test]
    fn rejects_zero_block_size() {
        let mut config = Config::default();
        config.audio.capture_block_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn response_mode_modality_names() {
        assert_eq!(ResponseMode::Audio.modality(), "AUDIO");
        assert_eq!(ResponseMode::Text.modality(), "TEXT");
    }
}
