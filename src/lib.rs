//! Snuggles - realtime voice assistant
//!
//! This library provides the turn-taking audio pipeline behind the
//! Dr. Snuggles voice assistant:
//! - Voice activity detection with echo-aware barge-in
//! - Format bridging between device audio and wire PCM
//! - Gapless, cancelable playback scheduling
//! - A live session controller with reconnect, backoff and resumption
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────────────────┐  base64 PCM  ┌──────────────┐
//! │   Capture    │──────────▶│    SessionController     │─────────────▶│  Transport   │
//! │  (cpal in)   │           │  VAD │ Bridge │ Dedup    │◀─────────────│ (Gemini WS)  │
//! └──────────────┘           └────────────┬─────────────┘   messages   └──────────────┘
//!                                         │ samples / MP3
//!                            ┌────────────▼─────────────┐
//!                            │    PlaybackScheduler     │
//!                            │       (cpal out)         │
//!                            └──────────────────────────┘
//! ```

pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod session;
pub mod tts;
pub mod voice;

pub use app::Assistant;
pub use config::Config;
pub use error::{Error, Result};
pub use session::{ConnectionState, SessionController, SessionEvent};
