//! Error types for the Snuggles voice assistant

use thiserror::Error;

/// Result type alias for Snuggles operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Capture or playback device unavailable or revoked
    #[error("audio device error: {0}")]
    Device(String),

    /// Encoded audio could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Realtime transport error (handshake, send, closed socket)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed protocol payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential or configuration rejected by the remote endpoint
    #[error("auth error: {0}")]
    Auth(String),

    /// Every candidate model was reported unavailable
    #[error("no live model available: {0}")]
    ModelUnavailable(String),

    /// Operation requires an open session
    #[error("not connected")]
    NotConnected,

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Context provider error
    #[error("context error: {0}")]
    Context(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
