//! Voice activity detection
//!
//! Classifies fixed-size frames as speech or silence from RMS energy and
//! zero-crossing rate, with hysteresis on both edges. While the remote side
//! is speaking, the silence→speech edge requires energy above a stricter
//! barge-in threshold so that echo of our own output does not count as the
//! user talking.

use serde::Deserialize;

/// Sensitivity presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Needs loud, sustained speech
    Low,
    #[default]
    Medium,
    /// Picks up quiet speech quickly
    High,
}

impl Sensitivity {
    /// RMS threshold and minimum speech frames for this preset
    #[must_use]
    pub const fn thresholds(self) -> (f32, u32) {
        match self {
            Self::Low => (0.02, 5),
            Self::Medium => (0.01, 3),
            Self::High => (0.005, 2),
        }
    }
}

impl std::str::FromStr for Sensitivity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(crate::Error::Config(format!("unknown sensitivity: {other}"))),
        }
    }
}

/// VAD tuning
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Sample rate of the frames being classified
    pub sample_rate: u32,
    /// RMS energy above which a frame is tentatively speech
    pub rms_threshold: f32,
    /// Consecutive speech frames before speech starts
    pub min_speech_frames: u32,
    /// Consecutive silence frames before speech ends
    pub min_silence_frames: u32,
    /// Optional zero-crossing rate floor, rejects low-frequency rumble
    pub zcr_threshold: Option<f32>,
    /// RMS multiplier required to start speech while the remote is speaking
    pub barge_in_multiplier: f32,
}

impl VadConfig {
    /// Config for a sensitivity preset
    #[must_use]
    pub const fn for_sensitivity(sensitivity: Sensitivity, sample_rate: u32) -> Self {
        let (rms_threshold, min_speech_frames) = sensitivity.thresholds();
        Self {
            sample_rate,
            rms_threshold,
            min_speech_frames,
            min_silence_frames: 25,
            zcr_threshold: None,
            barge_in_multiplier: 3.0,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::for_sensitivity(Sensitivity::Medium, super::DEFAULT_DEVICE_RATE)
    }
}

/// Partial config update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VadConfigUpdate {
    pub rms_threshold: Option<f32>,
    pub min_speech_frames: Option<u32>,
    pub min_silence_frames: Option<u32>,
    pub zcr_threshold: Option<f32>,
    pub barge_in_multiplier: Option<f32>,
}

impl From<Sensitivity> for VadConfigUpdate {
    fn from(sensitivity: Sensitivity) -> Self {
        let (rms, frames) = sensitivity.thresholds();
        Self {
            rms_threshold: Some(rms),
            min_speech_frames: Some(frames),
            ..Self::default()
        }
    }
}

/// Snapshot of detector state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VadState {
    pub is_speaking: bool,
    pub consecutive_speech_frames: u32,
    pub consecutive_silence_frames: u32,
    pub is_remote_speaking: bool,
}

/// Speaking-state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEdge {
    /// Silence → speech
    SpeechStarted,
    /// Speech → silence
    SpeechEnded,
}

/// Result of classifying one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadDecision {
    /// Frame belongs to an active speech span and should be sent upstream
    pub propagate: bool,
    /// Transition caused by this frame, if any
    pub edge: Option<VadEdge>,
}

/// Energy and zero-crossing voice activity detector
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
}

impl VoiceActivityDetector {
    /// Create a detector with the given tuning
    #[must_use]
    pub fn new(config: VadConfig) -> Self {
        tracing::debug!(
            rms_threshold = config.rms_threshold,
            min_speech_frames = config.min_speech_frames,
            min_silence_frames = config.min_silence_frames,
            "voice activity detector initialized"
        );
        Self {
            config,
            state: VadState::default(),
        }
    }

    /// Classify one frame and update hysteresis counters
    ///
    /// Empty or non-finite frames count as silence.
    pub fn process(&mut self, samples: &[f32]) -> VadDecision {
        let (rms, zcr) = frame_features(samples);
        let tentative = rms > self.config.rms_threshold
            && self.config.zcr_threshold.is_none_or(|floor| zcr > floor);

        if tentative {
            self.state.consecutive_speech_frames =
                self.state.consecutive_speech_frames.saturating_add(1);
            self.state.consecutive_silence_frames = 0;
        } else {
            self.state.consecutive_silence_frames =
                self.state.consecutive_silence_frames.saturating_add(1);
            self.state.consecutive_speech_frames = 0;
        }

        let mut edge = None;
        if self.state.is_speaking {
            if self.state.consecutive_silence_frames >= self.config.min_silence_frames {
                self.state.is_speaking = false;
                edge = Some(VadEdge::SpeechEnded);
                tracing::debug!("speech ended");
            }
        } else if self.state.consecutive_speech_frames >= self.config.min_speech_frames {
            let barge_in_floor = self.config.rms_threshold * self.config.barge_in_multiplier;
            if !self.state.is_remote_speaking || rms >= barge_in_floor {
                self.state.is_speaking = true;
                edge = Some(VadEdge::SpeechStarted);
                tracing::debug!(
                    rms,
                    remote_speaking = self.state.is_remote_speaking,
                    "speech started"
                );
            } else {
                tracing::trace!(rms, barge_in_floor, "speech suppressed while remote speaking");
            }
        }

        VadDecision {
            propagate: self.state.is_speaking,
            edge,
        }
    }

    /// Mark whether the remote endpoint is producing audio
    pub const fn set_remote_speaking(&mut self, speaking: bool) {
        self.state.is_remote_speaking = speaking;
    }

    /// Apply a partial config update
    pub fn update_config(&mut self, update: &VadConfigUpdate) {
        if let Some(v) = update.rms_threshold {
            self.config.rms_threshold = v;
        }
        if let Some(v) = update.min_speech_frames {
            self.config.min_speech_frames = v.max(1);
        }
        if let Some(v) = update.min_silence_frames {
            self.config.min_silence_frames = v.max(1);
        }
        if let Some(v) = update.zcr_threshold {
            self.config.zcr_threshold = Some(v);
        }
        if let Some(v) = update.barge_in_multiplier {
            self.config.barge_in_multiplier = v;
        }
        tracing::debug!(config = ?self.config, "vad config updated");
    }

    /// Clear counters and both speaking flags
    pub fn reset(&mut self) {
        self.state = VadState::default();
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    /// Current config
    #[must_use]
    pub const fn config(&self) -> &VadConfig {
        &self.config
    }
}

/// RMS energy and zero-crossing rate of a frame
///
/// Returns zeros for empty or non-finite input.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn frame_features(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() || samples.iter().any(|s| !s.is_finite()) {
        return (0.0, 0.0);
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();

    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    let zcr = if samples.len() > 1 {
        crossings as f32 / (samples.len() - 1) as f32
    } else {
        0.0
    };

    (rms, zcr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(min_speech: u32, min_silence: u32) -> VoiceActivityDetector {
        VoiceActivityDetector::new(VadConfig {
            sample_rate: 48_000,
            rms_threshold: 0.01,
            min_speech_frames: min_speech,
            min_silence_frames: min_silence,
            zcr_threshold: None,
            barge_in_multiplier: 3.0,
        })
    }

    fn loud() -> Vec<f32> {
        (0..480).map(|i| if i % 2 == 0 { 0.2 } else { -0.2 }).collect()
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; 480]
    }

    #[test]
    fn features_of_silence_and_tone() {
        assert_eq!(frame_features(&quiet()), (0.0, 0.0));
        let (rms, zcr) = frame_features(&loud());
        assert!((rms - 0.2).abs() < 1e-4);
        assert!(zcr > 0.99);
    }

    #[test]
    fn empty_and_nan_frames_are_silence() {
        let mut vad = detector(1, 1);
        assert!(!vad.process(&[]).propagate);
        assert!(!vad.process(&[f32::NAN, 0.5]).propagate);
        assert_eq!(vad.state().consecutive_silence_frames, 2);
    }

    #[test]
    fn documented_scenario_transitions() {
        let mut vad = detector(3, 5);
        let mut edges = Vec::new();
        let frames: Vec<Vec<f32>> = [quiet(), quiet(), loud(), loud(), loud()]
            .into_iter()
            .chain(std::iter::repeat_n(quiet(), 7))
            .collect();

        for (i, frame) in frames.iter().enumerate() {
            let decision = vad.process(frame);
            if let Some(edge) = decision.edge {
                edges.push((i + 1, edge));
            }
        }

        assert_eq!(
            edges,
            vec![(5, VadEdge::SpeechStarted), (10, VadEdge::SpeechEnded)]
        );
        assert!(!vad.state().is_speaking);
    }

    #[test]
    fn hangover_frames_still_propagate() {
        let mut vad = detector(1, 3);
        assert!(vad.process(&loud()).propagate);
        assert!(vad.process(&quiet()).propagate);
        assert!(vad.process(&quiet()).propagate);
        let last = vad.process(&quiet());
        assert!(!last.propagate);
        assert_eq!(last.edge, Some(VadEdge::SpeechEnded));
    }

    #[test]
    fn remote_speaking_suppresses_moderate_speech() {
        let mut vad = detector(2, 5);
        vad.set_remote_speaking(true);

        // 0.02 RMS is above the base threshold but below 3x
        let moderate = vec![0.02f32; 480];
        for _ in 0..4 {
            assert!(vad.process(&moderate).edge.is_none());
        }
        assert!(!vad.state().is_speaking);
        assert_eq!(vad.state().consecutive_speech_frames, 4);

        // Counting continued, so clearing the flag surfaces speech immediately
        vad.set_remote_speaking(false);
        assert_eq!(vad.process(&moderate).edge, Some(VadEdge::SpeechStarted));
    }

    #[test]
    fn strong_speech_barges_in() {
        let mut vad = detector(2, 5);
        vad.set_remote_speaking(true);
        vad.process(&loud());
        assert_eq!(vad.process(&loud()).edge, Some(VadEdge::SpeechStarted));
    }

    #[test]
    fn zcr_floor_rejects_rumble() {
        let mut vad = detector(1, 1);
        vad.update_config(&VadConfigUpdate {
            zcr_threshold: Some(0.1),
            ..VadConfigUpdate::default()
        });
        // Constant offset: loud but never crosses zero
        let rumble = vec![0.3f32; 480];
        assert!(!vad.process(&rumble).propagate);
        assert!(vad.process(&loud()).propagate);
    }

    #[test]
    fn reset_clears_everything() {
        let mut vad = detector(1, 5);
        vad.set_remote_speaking(true);
        vad.process(&vec![1.0; 480]);
        vad.reset();
        assert_eq!(vad.state(), VadState::default());
    }

    #[test]
    fn sensitivity_presets_order() {
        let (low, low_frames) = Sensitivity::Low.thresholds();
        let (med, med_frames) = Sensitivity::Medium.thresholds();
        let (high, high_frames) = Sensitivity::High.thresholds();
        assert!(low > med && med > high);
        assert!(low_frames > med_frames && med_frames > high_frames);
        assert_eq!("HIGH".parse::<Sensitivity>().unwrap(), Sensitivity::High);
        assert!("loud".parse::<Sensitivity>().is_err());
    }
}
