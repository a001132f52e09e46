//! Audio format bridge between device audio and the wire protocol
//!
//! Upstream: device-rate float PCM → wire-rate 16-bit PCM → base64.
//! Downstream: base64 (or raw bytes) 16-bit PCM at the wire rate → float PCM
//! at the playback rate. Encoded containers (MP3 from the TTS fallback) are
//! decoded separately by [`decode_encoded`].

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Resample mono float PCM with linear interpolation
///
/// Output length is always `round(input.len() * to / from)`. A zero rate
/// yields empty output.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return input.to_vec();
    }

    let out_len = resampled_len(input.len(), from_rate, to_rate);
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;
            input[idx] + (input[next] - input[idx]) * frac
        })
        .collect()
}

/// Number of output samples for a rate conversion, rounded half up
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub const fn resampled_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    let from = from_rate as u128;
    let scaled = input_len as u128 * to_rate as u128;
    ((scaled + from / 2) / from) as usize
}

/// Convert a float sample to 16-bit PCM, clamping instead of wrapping
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 {
        clamped * 32768.0
    } else {
        clamped * 32767.0
    };
    scaled.round() as i16
}

/// Convert a 16-bit PCM sample to float in [-1, 1]
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Encode float samples as little-endian 16-bit PCM bytes
#[must_use]
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
        .collect()
}

/// Decode little-endian 16-bit PCM bytes into float samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_samples(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() % 2 != 0 {
        tracing::warn!(len = bytes.len(), "odd PCM byte count, dropping trailing byte");
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Extract the sample rate from a mime type such as `audio/pcm;rate=24000`
#[must_use]
pub fn pcm_rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

/// Converts between device audio and wire audio
#[derive(Debug, Clone, Copy)]
pub struct FormatBridge {
    wire_input_rate: u32,
    playback_rate: u32,
}

impl FormatBridge {
    /// Create a bridge for the given wire input rate and playback rate
    #[must_use]
    pub const fn new(wire_input_rate: u32, playback_rate: u32) -> Self {
        Self {
            wire_input_rate,
            playback_rate,
        }
    }

    /// Rate the wire expects for microphone audio
    #[must_use]
    pub const fn wire_input_rate(&self) -> u32 {
        self.wire_input_rate
    }

    /// Declared rate of everything handed to playback
    #[must_use]
    pub const fn playback_rate(&self) -> u32 {
        self.playback_rate
    }

    /// Mime type of upstream audio
    #[must_use]
    pub fn upstream_mime(&self) -> String {
        format!("audio/pcm;rate={}", self.wire_input_rate)
    }

    /// Device float PCM → base64 16-bit PCM at the wire input rate
    ///
    /// Empty input yields an empty string.
    #[must_use]
    pub fn encode_upstream(&self, samples: &[f32], device_rate: u32) -> String {
        let resampled = resample_linear(samples, device_rate, self.wire_input_rate);
        if resampled.is_empty() {
            return String::new();
        }
        STANDARD.encode(pcm16_bytes(&resampled))
    }

    /// Base64 16-bit PCM at `wire_rate` → float PCM at the playback rate
    ///
    /// Undecodable input degrades to empty output.
    #[must_use]
    pub fn decode_downstream(&self, data: &str, wire_rate: u32) -> Vec<f32> {
        match STANDARD.decode(data.trim()) {
            Ok(bytes) => self.decode_downstream_bytes(&bytes, wire_rate),
            Err(e) => {
                tracing::warn!(error = %e, "invalid base64 audio, dropping chunk");
                Vec::new()
            }
        }
    }

    /// Raw 16-bit PCM bytes at `wire_rate` → float PCM at the playback rate
    #[must_use]
    pub fn decode_downstream_bytes(&self, bytes: &[u8], wire_rate: u32) -> Vec<f32> {
        let samples = pcm16_samples(bytes);
        resample_linear(&samples, wire_rate, self.playback_rate)
    }

    /// Decode an encoded container and convert it to the playback rate
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the bytes are not decodable audio
    pub fn decode_encoded_for_playback(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let decoded = decode_encoded(bytes)?;
        Ok(resample_linear(
            &decoded.samples,
            decoded.sample_rate,
            self.playback_rate,
        ))
    }
}

/// Mono PCM decoded from an encoded container
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode MP3 bytes to mono float samples
///
/// # Errors
///
/// Returns `Error::Decode` if no frame can be decoded
pub fn decode_encoded(data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if let Ok(rate) = u32::try_from(frame.sample_rate) {
                    sample_rate = rate;
                }
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = i16_to_f32(chunk[0]);
                        let right = i16_to_f32(chunk.get(1).copied().unwrap_or(chunk[0]));
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| i16_to_f32(s)));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Decode("no decodable audio frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_lengths_follow_ratio() {
        for (from, to) in [(48_000, 16_000), (48_000, 24_000), (16_000, 48_000), (24_000, 48_000)] {
            for len in [0usize, 1, 7, 480, 960, 1001] {
                let input = vec![0.1f32; len];
                let expected = (len as f64 * f64::from(to) / f64::from(from)).round() as usize;
                assert_eq!(
                    resample_linear(&input, from, to).len(),
                    expected,
                    "{from}->{to} len {len}"
                );
            }
        }
    }

    #[test]
    fn silent_960_at_48k_encodes_320_zero_samples() {
        let bridge = FormatBridge::new(16_000, 48_000);
        let encoded = bridge.encode_upstream(&[0.0; 960], 48_000);
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(bytes.len(), 640);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn clamps_instead_of_wrapping() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
        assert_eq!(f32_to_i16(f32::NAN), 0);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn empty_input_is_empty_output() {
        let bridge = FormatBridge::new(16_000, 48_000);
        assert!(bridge.encode_upstream(&[], 48_000).is_empty());
        assert!(bridge.decode_downstream("", 24_000).is_empty());
        assert!(bridge.decode_downstream("not base64!!", 24_000).is_empty());
    }

    #[test]
    fn interpolates_between_samples() {
        let up = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(up.len(), 4);
        assert!((up[1] - 0.5).abs() < 1e-6);
        // Past the last input sample the value holds
        assert!((up[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn parses_rate_from_mime() {
        assert_eq!(pcm_rate_from_mime("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(pcm_rate_from_mime("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(pcm_rate_from_mime("audio/pcm"), None);
    }

    #[test]
    fn garbage_is_not_mp3() {
        assert!(matches!(decode_encoded(&[1, 2, 3, 4]), Err(Error::Decode(_))));
        assert!(matches!(decode_encoded(&[]), Err(Error::Decode(_))));
    }
}
