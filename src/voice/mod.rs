//! Voice processing module
//!
//! Handles microphone capture, voice activity detection, format conversion
//! between device and wire audio, and gapless playback scheduling.

mod bridge;
mod capture;
mod playback;
mod scheduler;
mod vad;

/// Nominal device sample rate; also the declared rate of playback buffers
pub const DEFAULT_DEVICE_RATE: u32 = 48_000;

pub use bridge::{
    DecodedAudio, FormatBridge, decode_encoded, f32_to_i16, i16_to_f32, pcm_rate_from_mime,
    pcm16_bytes, pcm16_samples, resample_linear, resampled_len,
};
pub use capture::{AudioFrame, CapturePipeline, FrameAssembler, samples_to_wav};
pub use playback::CpalOutput;
pub use scheduler::{
    DeviceState, OutputDevice, PlaybackScheduler, PlaybackSink, ScheduledSegment,
    SchedulerConfig, SourceId, duration_of,
};
pub use vad::{
    Sensitivity, VadConfig, VadConfigUpdate, VadDecision, VadEdge, VadState,
    VoiceActivityDetector, frame_features,
};
