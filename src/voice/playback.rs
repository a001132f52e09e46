//! Speaker output through cpal
//!
//! A single long-lived output stream mixes every scheduled source at its
//! absolute start frame. The stream's own frame counter is the output
//! clock, so scheduled start times stay sample accurate regardless of how
//! late the network delivered the audio.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};

use crate::voice::bridge::resample_linear;
use crate::voice::scheduler::{DeviceState, OutputDevice, SourceId};
use crate::{Error, Result};

struct Voice {
    id: SourceId,
    samples: Arc<[f32]>,
    start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Shared {
    voices: Mutex<Vec<Voice>>,
    position: AtomicU64,
    failed: AtomicBool,
}

/// Default output device driven by absolute start times
pub struct CpalOutput {
    stream: Option<Stream>,
    shared: Arc<Shared>,
    device_rate: u32,
}

impl CpalOutput {
    /// Create an output; the device is opened by [`OutputDevice::start`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: None,
            shared: Arc::new(Shared::default()),
            device_rate: super::DEFAULT_DEVICE_RATE,
        }
    }

    /// Rate the hardware is running at
    #[must_use]
    pub const fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Number of sources not yet finished
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.shared.voices.lock().map(|v| v.len()).unwrap_or(0)
    }

    fn open(&mut self) -> Result<Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| Error::Device(e.to_string()))?;
        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels).max(1);
        self.device_rate = config.sample_rate.0;

        let shared = Arc::clone(&self.shared);
        let failed = Arc::clone(&self.shared);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render(&shared, data, channels);
                },
                move |err| {
                    tracing::error!(error = %err, "audio output error");
                    failed.failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.device_rate,
            channels,
            "audio output started"
        );

        Ok(stream)
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for CpalOutput {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() && !self.shared.failed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.stop();
        self.shared.position.store(0, Ordering::SeqCst);
        self.shared.failed.store(false, Ordering::SeqCst);
        let stream = self.open()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut voices) = self.shared.voices.lock() {
            voices.clear();
        }
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio output stopped");
        }
    }

    fn state(&self) -> DeviceState {
        match (&self.stream, self.shared.failed.load(Ordering::SeqCst)) {
            (None, _) => DeviceState::Stopped,
            (Some(_), true) => DeviceState::Failed,
            (Some(_), false) => DeviceState::Running,
        }
    }

    fn now(&self) -> Duration {
        let frames = self.shared.position.load(Ordering::SeqCst);
        frames_to_duration(frames, self.device_rate)
    }

    fn play_at(
        &mut self,
        id: SourceId,
        samples: Arc<[f32]>,
        sample_rate: u32,
        start_at: Duration,
    ) -> Result<()> {
        if self.state() != DeviceState::Running {
            return Err(Error::Device("output not running".to_string()));
        }

        let samples = if sample_rate == self.device_rate {
            samples
        } else {
            Arc::from(resample_linear(&samples, sample_rate, self.device_rate))
        };

        let voice = Voice {
            id,
            samples,
            start_frame: duration_to_frames(start_at, self.device_rate),
        };

        self.shared
            .voices
            .lock()
            .map_err(|_| Error::Device("output mixer poisoned".to_string()))?
            .push(voice);
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Ok(mut voices) = self.shared.voices.lock() {
            voices.retain(|v| v.id != id);
        }
    }
}

/// Mix every active voice into one output buffer and advance the clock
#[allow(clippy::cast_possible_truncation)]
fn render(shared: &Shared, data: &mut [f32], channels: usize) {
    let frames = data.len() / channels;
    let base = shared.position.load(Ordering::SeqCst);

    data.fill(0.0);

    if let Ok(mut voices) = shared.voices.lock() {
        for voice in voices.iter() {
            if voice.start_frame >= base + frames as u64 || voice.end_frame() <= base {
                continue;
            }
            for (i, frame) in data.chunks_mut(channels).enumerate() {
                let at = base + i as u64;
                if at < voice.start_frame {
                    continue;
                }
                let Some(&sample) = voice.samples.get((at - voice.start_frame) as usize) else {
                    break;
                };
                for out in frame.iter_mut() {
                    *out += sample;
                }
            }
        }
        let end = base + frames as u64;
        voices.retain(|v| v.end_frame() > end);
    }

    for out in data.iter_mut() {
        *out = out.clamp(-1.0, 1.0);
    }

    shared.position.store(base + frames as u64, Ordering::SeqCst);
}

fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let rate = u128::from(rate);
    let nanos = (u128::from(frames) * 1_000_000_000 + rate / 2) / rate;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Nearest frame to `at`, so segments placed end to end stay frame-exact
fn duration_to_frames(at: Duration, rate: u32) -> u64 {
    let frames = (at.as_nanos() * u128::from(rate) + 500_000_000) / 1_000_000_000;
    u64::try_from(frames).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::scheduler::duration_of;

    fn voice(id: u64, start: u64, samples: &[f32]) -> Voice {
        Voice {
            id: SourceId(id),
            samples: Arc::from(samples),
            start_frame: start,
        }
    }

    #[test]
    fn mixes_voices_at_their_start_frames() {
        let shared = Shared::default();
        shared
            .voices
            .lock()
            .unwrap()
            .extend([voice(0, 2, &[0.5, 0.5]), voice(1, 3, &[0.25])]);

        let mut out = [9.0f32; 6];
        render(&shared, &mut out, 1);

        assert_eq!(out, [0.0, 0.0, 0.5, 0.75, 0.0, 0.0]);
        assert_eq!(shared.position.load(Ordering::SeqCst), 6);
        assert!(shared.voices.lock().unwrap().is_empty());
    }

    #[test]
    fn duplicates_mono_across_channels_and_clamps() {
        let shared = Shared::default();
        shared
            .voices
            .lock()
            .unwrap()
            .extend([voice(0, 0, &[0.8]), voice(1, 0, &[0.8])]);

        let mut out = [0.0f32; 4];
        render(&shared, &mut out, 2);
        assert_eq!(out, [1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn unfinished_voices_carry_over() {
        let shared = Shared::default();
        shared.voices.lock().unwrap().push(voice(0, 0, &[0.1; 10]));

        let mut out = [0.0f32; 4];
        render(&shared, &mut out, 1);
        assert_eq!(shared.voices.lock().unwrap().len(), 1);
    }

    #[test]
    fn clock_conversions() {
        assert_eq!(frames_to_duration(48_000, 48_000), Duration::from_secs(1));
        assert_eq!(duration_to_frames(Duration::from_millis(10), 48_000), 480);
        assert_eq!(frames_to_duration(1, 0), Duration::ZERO);
    }

    #[test]
    fn back_to_back_segments_land_on_exact_frames() {
        // 44.1 kHz frames are not a whole number of nanoseconds
        let mut horizon = Duration::ZERO;
        let mut frames = 0u64;
        for len in [1usize, 7, 441, 1_000, 3, 2_205, 1] {
            assert_eq!(duration_to_frames(horizon, 44_100), frames);
            horizon += duration_of(len, 44_100);
            frames += len as u64;
        }
        assert_eq!(duration_to_frames(horizon, 44_100), frames);
        assert_eq!(duration_to_frames(frames_to_duration(1, 44_100), 44_100), 1);
    }
}
