//! Gapless, cancelable playback scheduling
//!
//! Segments arrive asynchronously with network jitter. Each one is placed on
//! the output clock at `max(now + safety_margin, horizon)` and the horizon is
//! advanced past it, so playback is back-to-back with no overlap. The output
//! device itself sits behind [`OutputDevice`] so the timeline can be driven
//! by a real sound card or a test clock.

use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::voice::bridge::FormatBridge;

/// Identifier of a scheduled source on the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Health of the output resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Not started
    Stopped,
    /// Accepting scheduled sources
    Running,
    /// Failed or closed underneath us; needs a restart
    Failed,
}

/// An audio output that can play buffers at absolute clock positions
pub trait OutputDevice {
    /// Open the output resource; the clock restarts from zero
    ///
    /// # Errors
    ///
    /// Returns error if the device is unavailable
    fn start(&mut self) -> Result<()>;

    /// Close the output resource, dropping all sources
    fn stop(&mut self);

    /// Current health
    fn state(&self) -> DeviceState;

    /// Monotonic output clock
    fn now(&self) -> Duration;

    /// Play `samples` (mono, at `sample_rate`) starting at clock position `start_at`
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be started
    fn play_at(
        &mut self,
        id: SourceId,
        samples: Arc<[f32]>,
        sample_rate: u32,
        start_at: Duration,
    ) -> Result<()>;

    /// Stop a source; unknown or finished ids are ignored
    fn stop_source(&mut self, id: SourceId);
}

/// A segment placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSegment {
    pub id: SourceId,
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledSegment {
    /// Clock position where the segment finishes
    #[must_use]
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Scheduler timing parameters
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Declared rate of every enqueued buffer
    pub sample_rate: u32,
    /// Minimum lead time before a new segment starts
    pub safety_margin: Duration,
    /// Horizon lag beyond which the schedule is resynchronised to now
    pub drift_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_rate: super::DEFAULT_DEVICE_RATE,
            safety_margin: Duration::from_millis(50),
            drift_threshold: Duration::from_millis(250),
        }
    }
}

/// Where decoded assistant audio goes
///
/// The session controller talks to playback only through this seam.
pub trait PlaybackSink {
    /// Queue float PCM at the sink's declared rate
    fn enqueue(&mut self, samples: &[f32]) -> Option<ScheduledSegment>;

    /// Decode an encoded container (MP3) and queue it
    fn enqueue_encoded(&mut self, bytes: &[u8]) -> Option<ScheduledSegment>;

    /// Stop everything already scheduled and rewind the horizon to now
    fn cancel_all(&mut self);

    /// Current position of the output clock that segments are placed on
    fn clock(&self) -> Duration;
}

/// Schedules decoded buffers on an output device
pub struct PlaybackScheduler<D: OutputDevice> {
    device: D,
    config: SchedulerConfig,
    bridge: FormatBridge,
    horizon: Duration,
    active: Vec<ScheduledSegment>,
    next_id: u64,
    running: bool,
}

impl<D: OutputDevice> PlaybackScheduler<D> {
    /// Create a scheduler owning `device`
    #[must_use]
    pub fn new(device: D, config: SchedulerConfig) -> Self {
        Self {
            device,
            bridge: FormatBridge::new(config.sample_rate, config.sample_rate),
            config,
            horizon: Duration::ZERO,
            active: Vec::new(),
            next_id: 0,
            running: false,
        }
    }

    /// Start the output resource
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.device.start()?;
        self.horizon = self.device.now();
        self.running = true;
        tracing::debug!(sample_rate = self.config.sample_rate, "playback scheduler started");
        Ok(())
    }

    /// Stop all audio and close the output resource
    pub fn stop(&mut self) {
        self.cancel_all();
        self.device.stop();
        self.running = false;
        self.horizon = Duration::ZERO;
        tracing::debug!("playback scheduler stopped");
    }

    /// Whether the scheduler accepts segments
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Earliest start for the next segment
    #[must_use]
    pub const fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Segments that have not finished yet
    #[must_use]
    pub fn active_segments(&self) -> &[ScheduledSegment] {
        &self.active
    }

    /// Borrow the output device
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Place `samples` on the timeline
    ///
    /// Returns the scheduled segment, or `None` if the buffer was empty, the
    /// scheduler is stopped, or the device refused it twice.
    pub fn enqueue_samples(&mut self, samples: &[f32]) -> Option<ScheduledSegment> {
        if samples.is_empty() || !self.running {
            return None;
        }

        if self.device.state() != DeviceState::Running {
            tracing::warn!("output device not running, restarting");
            if let Err(e) = self.restart() {
                tracing::error!(error = %e, "output device restart failed, dropping segment");
                return None;
            }
        }

        self.prune_finished();

        let samples: Arc<[f32]> = Arc::from(samples);
        let duration = duration_of(samples.len(), self.config.sample_rate);
        let id = self.allocate_id();

        let start = self.next_start();
        match self
            .device
            .play_at(id, Arc::clone(&samples), self.config.sample_rate, start)
        {
            Ok(()) => Some(self.commit(id, start, duration)),
            Err(first) => {
                tracing::warn!(error = %first, "segment failed to start, retrying at now");
                self.horizon = self.device.now();
                let retry_start = self.next_start();
                match self
                    .device
                    .play_at(id, samples, self.config.sample_rate, retry_start)
                {
                    Ok(()) => Some(self.commit(id, retry_start, duration)),
                    Err(second) => {
                        tracing::error!(error = %second, "segment failed twice, dropping");
                        None
                    }
                }
            }
        }
    }

    /// Stop every tracked segment and rewind the horizon to now
    ///
    /// Idempotent; segments enqueued afterwards are unaffected.
    pub fn cancel(&mut self) {
        if !self.active.is_empty() {
            tracing::debug!(sources = self.active.len(), "canceling playback");
        }
        for segment in self.active.drain(..) {
            self.device.stop_source(segment.id);
        }
        if self.running {
            self.horizon = self.device.now();
        }
    }

    fn restart(&mut self) -> Result<()> {
        self.active.clear();
        self.device.stop();
        self.device.start()?;
        self.horizon = self.device.now();
        Ok(())
    }

    fn next_start(&mut self) -> Duration {
        let now = self.device.now();
        if self.horizon + self.config.drift_threshold < now {
            tracing::debug!(
                lag_ms = (now - self.horizon).as_millis(),
                "playback fell behind, resynchronising"
            );
            self.horizon = now;
        }
        (now + self.config.safety_margin).max(self.horizon)
    }

    fn commit(&mut self, id: SourceId, start: Duration, duration: Duration) -> ScheduledSegment {
        let segment = ScheduledSegment {
            id,
            start,
            duration,
        };
        self.horizon = segment.end();
        self.active.push(segment);
        tracing::trace!(
            id = id.0,
            start_ms = start.as_millis(),
            duration_ms = duration.as_millis(),
            "segment scheduled"
        );
        segment
    }

    fn prune_finished(&mut self) {
        let now = self.device.now();
        self.active.retain(|s| s.end() > now);
    }

    const fn allocate_id(&mut self) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl<D: OutputDevice> PlaybackSink for PlaybackScheduler<D> {
    fn enqueue(&mut self, samples: &[f32]) -> Option<ScheduledSegment> {
        self.enqueue_samples(samples)
    }

    fn enqueue_encoded(&mut self, bytes: &[u8]) -> Option<ScheduledSegment> {
        match self.bridge.decode_encoded_for_playback(bytes) {
            Ok(samples) => self.enqueue_samples(&samples),
            Err(e) => {
                tracing::warn!(error = %e, bytes = bytes.len(), "dropping undecodable audio");
                None
            }
        }
    }

    fn cancel_all(&mut self) {
        self.cancel();
    }

    fn clock(&self) -> Duration {
        self.device.now()
    }
}

/// Playback length of `len` samples at `sample_rate`
#[must_use]
pub fn duration_of(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = u128::from(sample_rate);
    let nanos = (len as u128 * 1_000_000_000 + rate / 2) / rate;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
