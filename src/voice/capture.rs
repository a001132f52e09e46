//! Microphone capture
//!
//! Opens the default input device and delivers fixed-size mono frames over a
//! bounded channel. The device callback never blocks: when the consumer
//! falls behind, frames are dropped. If the device fails, the sender is
//! dropped so the consumer sees the channel close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::voice::bridge::f32_to_i16;
use crate::{Error, Result};

/// Frames buffered between the device callback and the pipeline
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// One block of captured mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub sequence: u64,
}

/// Splits interleaved device callbacks into mono frames of a fixed size
#[derive(Debug)]
pub struct FrameAssembler {
    channels: usize,
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    /// Create an assembler for `channels` interleaved input
    #[must_use]
    pub fn new(channels: usize, block_size: usize, sample_rate: u32) -> Self {
        Self {
            channels: channels.max(1),
            block_size: block_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(block_size * 2),
            next_sequence: 0,
        }
    }

    /// Feed one callback's worth of interleaved samples
    ///
    /// Returns every complete frame now available; a remainder is kept for
    /// the next call.
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        if self.channels == 1 {
            self.pending.extend_from_slice(interleaved);
        } else {
            let channels = self.channels as f32;
            self.pending.extend(
                interleaved
                    .chunks_exact(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels),
            );
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.block_size {
            let samples: Vec<f32> = self.pending.drain(..self.block_size).collect();
            frames.push(AudioFrame {
                samples,
                sample_rate: self.sample_rate,
                sequence: self.next_sequence,
            });
            self.next_sequence += 1;
        }
        frames
    }
}

/// Captures from the default input device
pub struct CapturePipeline {
    block_size: usize,
    stream: Option<Stream>,
    sample_rate: u32,
    dropped: Arc<AtomicU64>,
}

impl CapturePipeline {
    /// Create a pipeline producing frames of `block_size` samples
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            stream: None,
            sample_rate: super::DEFAULT_DEVICE_RATE,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the microphone and start delivering frames
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no input device is available or the stream
    /// cannot be started
    pub fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        self.stop();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| Error::Device(e.to_string()))?;
        let config: StreamConfig = supported.config();
        self.sample_rate = config.sample_rate.0;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let sender = Arc::new(Mutex::new(Some(tx)));
        let error_sender = Arc::clone(&sender);
        let dropped = Arc::clone(&self.dropped);
        let mut assembler =
            FrameAssembler::new(usize::from(config.channels), self.block_size, self.sample_rate);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let Ok(guard) = sender.lock() else { return };
                    let Some(tx) = guard.as_ref() else { return };
                    for frame in assembler.push(data) {
                        if tx.try_send(frame).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if let Ok(mut guard) = error_sender.lock() {
                        guard.take();
                    }
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        self.stream = Some(stream);

        tracing::info!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.sample_rate,
            channels = config.channels,
            block_size = self.block_size,
            "audio capture started"
        );
        Ok(rx)
    }

    /// Release the microphone; the frame channel closes
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            let dropped = self.dropped.swap(0, Ordering::Relaxed);
            tracing::debug!(dropped_frames = dropped, "audio capture stopped");
        }
    }

    /// Whether the microphone is open
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Device sample rate of delivered frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames dropped because the consumer fell behind
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Encode mono float samples as a 16-bit WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(f32_to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_fixed_blocks_with_remainder() {
        let mut assembler = FrameAssembler::new(1, 4, 48_000);
        assert!(assembler.push(&[0.1; 3]).is_empty());

        let frames = assembler.push(&[0.2; 6]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.1, 0.1, 0.1, 0.2]);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(frames[1].sample_rate, 48_000);
    }

    #[test]
    fn downmixes_interleaved_stereo() {
        let mut assembler = FrameAssembler::new(2, 2, 44_100);
        let frames = assembler.push(&[1.0, 0.0, 0.5, 0.5]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![0.5, 0.5]);
    }

    #[test]
    fn wav_roundtrips_through_hound() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 1.0], 16_000).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 4);
    }
}
