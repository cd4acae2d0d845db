//! PCM audio frames, framing and sample conversion.
//!
//! All audio crossing the session boundary is 16-bit little-endian PCM, mono.
//! Input frames are captured at [`INPUT_SAMPLE_RATE`]; output frames arrive at
//! whatever rate the agent emits, normally [`OUTPUT_SAMPLE_RATE`].

use base64::Engine;
use bytes::Bytes;
use std::time::Duration;

use crate::error::AudioError;

pub mod input;
pub mod output;

#[cfg(feature = "desktop-audio")]
pub mod cpal_device;

pub use input::{AudioInputPipeline, CaptureDevice, RealtimeInputSink};
pub use output::{
    AudioOutputPipeline, ManualClock, MonotonicClock, NullSink, PlaybackClock, PlaybackSink,
    ScheduledChunk,
};

/// Microphone capture rate expected by the agent.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate the agent emits audio at.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// A mono PCM16 buffer tagged with its sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Little-endian PCM16 bytes.
    pub data: Bytes,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Wrap raw PCM16 bytes.
    pub fn new(data: impl Into<Bytes>, sample_rate: u32) -> Self {
        Self { data: data.into(), sample_rate }
    }

    /// Encode samples as PCM16 little-endian.
    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(data, sample_rate)
    }

    /// Decode to samples. Fails if the byte count is odd.
    pub fn samples(&self) -> Result<Vec<i16>, AudioError> {
        if self.data.len() % 2 != 0 {
            return Err(AudioError::format(format!(
                "Invalid data length for PCM16: {} (must be even)",
                self.data.len()
            )));
        }
        Ok(self.data.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
    }

    /// Number of samples.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Playback duration.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.sample_count() as u64 * 1_000_000_000 / self.sample_rate as u64)
    }

    /// MIME type as used on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Base64 of the raw bytes.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Extract the `rate=` parameter of a PCM MIME type.
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

/// Cuts a sample stream into frames of exactly `frame_len` samples.
///
/// Samples that do not fill a whole frame stay buffered until more arrive or
/// the chunker is cleared.
#[derive(Debug, Clone)]
pub struct PcmChunker {
    buffer: Vec<i16>,
    frame_len: usize,
}

impl PcmChunker {
    /// Frames of `duration_ms` at `sample_rate`.
    pub fn new(sample_rate: u32, duration_ms: u32) -> Self {
        let frame_len = (sample_rate as u64 * duration_ms as u64 / 1000).max(1) as usize;
        Self { buffer: Vec::with_capacity(frame_len), frame_len }
    }

    /// Samples per frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Buffered samples not yet part of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Add samples, returning every frame they complete.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.buffer.extend_from_slice(samples);
        let whole = self.buffer.len() / self.frame_len * self.frame_len;
        if whole == 0 {
            return Vec::new();
        }
        let rest = self.buffer.split_off(whole);
        let full = std::mem::replace(&mut self.buffer, rest);
        full.chunks_exact(self.frame_len).map(<[i16]>::to_vec).collect()
    }

    /// Drop the partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Mix interleaved multi-channel samples to mono by averaging.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = samples[idx.min(samples.len() - 1)] as f64;
            let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Convert a float sample in `-1.0..=1.0` to PCM16.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Scale samples by `gain`, saturating at the PCM16 range.
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for s in samples.iter_mut() {
        *s = (*s as f32 * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}
