//! Desktop microphone and speaker through `cpal`.
//!
//! Capture tries i16/16 kHz/mono first, then f32/16 kHz/mono, then the
//! device's native config with software down-mix and resampling.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::output::{PlaybackClock, PlaybackSink, ScheduledChunk};
use super::input::CaptureDevice;
use super::{INPUT_SAMPLE_RATE, downmix, f32_to_i16, resample_linear};
use crate::error::AudioError;

/// `cpal::Stream` is `!Send` on some hosts; it is only touched behind a mutex.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

fn map_build_error(e: cpal::BuildStreamError) -> AudioError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            AudioError::DeviceUnavailable("device disconnected".to_string())
        }
        other => {
            let message = other.to_string();
            let lower = message.to_ascii_lowercase();
            if lower.contains("permission") || lower.contains("denied") {
                AudioError::PermissionDenied(message)
            } else {
                AudioError::stream(message)
            }
        }
    }
}

/// Default input device.
pub struct CpalCaptureDevice {
    device: cpal::Device,
    stream: Option<SendableStream>,
}

impl CpalCaptureDevice {
    /// Open the host's default input device.
    pub fn default_input() -> Result<Self, AudioError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string()))?;
        if let Ok(name) = device.name() {
            tracing::info!(device = %name, "Using input device");
        }
        Ok(Self { device, stream: None })
    }

    fn build_stream(&self, tx: mpsc::Sender<Vec<i16>>) -> Result<cpal::Stream, AudioError> {
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(INPUT_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };
        let err_callback = |err| tracing::warn!(error = %err, "Input stream error");

        let sender = tx.clone();
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let _ = sender.try_send(data.to_vec());
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let sender = tx.clone();
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = sender.try_send(data.iter().map(|&s| f32_to_i16(s)).collect());
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_native_stream(tx)
    }

    fn build_native_stream(&self, tx: mpsc::Sender<Vec<i16>>) -> Result<cpal::Stream, AudioError> {
        let default_config = self.device.default_input_config().map_err(|e| {
            AudioError::DeviceUnavailable(format!("Failed to query default input config: {}", e))
        })?;
        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let config: cpal::StreamConfig = default_config.clone().into();
        tracing::info!(channels, native_rate, "Capturing at native format, converting in software");

        let err_callback = |err| tracing::warn!(error = %err, "Input stream error");
        let convert = move |samples: &[i16]| {
            resample_linear(&downmix(samples, channels), native_rate, INPUT_SAMPLE_RATE)
        };

        match default_config.sample_format() {
            cpal::SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let _ = tx.try_send(convert(data));
                    },
                    err_callback,
                    None,
                )
                .map_err(map_build_error),
            cpal::SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let pcm: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                        let _ = tx.try_send(convert(&pcm));
                    },
                    err_callback,
                    None,
                )
                .map_err(map_build_error),
            fmt => Err(AudioError::format(format!("Unsupported native sample format: {:?}", fmt))),
        }
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn start(&mut self, tx: mpsc::Sender<Vec<i16>>) -> Result<(), AudioError> {
        let stream = self.build_stream(tx)?;
        stream.play().map_err(|e| AudioError::stream(format!("Failed to start input stream: {}", e)))?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.0.pause() {
                tracing::debug!(error = %e, "Input stream pause failed");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

struct PendingChunk {
    start: std::time::Duration,
    samples: Vec<f32>,
    pos: usize,
}

struct RenderState {
    queue: VecDeque<PendingChunk>,
    gain: f32,
}

/// Default output device. Chunks play at their scheduled start time as
/// measured by the pipeline's clock.
pub struct CpalPlaybackSink {
    state: Arc<Mutex<RenderState>>,
    device_rate: u32,
    _stream: Mutex<SendableStream>,
}

impl CpalPlaybackSink {
    /// Open the host's default output device.
    pub fn default_output(clock: Arc<dyn PlaybackClock>) -> Result<Self, AudioError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string()))?;
        let default_config = device.default_output_config().map_err(|e| {
            AudioError::DeviceUnavailable(format!("Failed to query default output config: {}", e))
        })?;
        if default_config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::format(format!(
                "Unsupported output sample format: {:?}",
                default_config.sample_format()
            )));
        }
        let device_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let config: cpal::StreamConfig = default_config.into();

        let state = Arc::new(Mutex::new(RenderState { queue: VecDeque::new(), gain: 1.0 }));
        let render_state = Arc::clone(&state);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render(&mut render_state.lock(), clock.now(), device_rate, channels, data);
                },
                |err| tracing::warn!(error = %err, "Output stream error"),
                None,
            )
            .map_err(map_build_error)?;
        stream.play().map_err(|e| AudioError::stream(format!("Failed to start output stream: {}", e)))?;

        Ok(Self { state, device_rate, _stream: Mutex::new(SendableStream(stream)) })
    }
}

fn render(
    state: &mut RenderState,
    now: std::time::Duration,
    device_rate: u32,
    channels: usize,
    out: &mut [f32],
) {
    let gain = state.gain;
    let frames = out.len() / channels.max(1);
    for i in 0..frames {
        let t = now + std::time::Duration::from_nanos(i as u64 * 1_000_000_000 / device_rate as u64);
        let mut value = 0.0;
        while let Some(head) = state.queue.front_mut() {
            if head.pos >= head.samples.len() {
                state.queue.pop_front();
                continue;
            }
            if head.start <= t {
                value = head.samples[head.pos] * gain;
                head.pos += 1;
            }
            break;
        }
        for c in 0..channels {
            out[i * channels + c] = value;
        }
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn schedule(&self, chunk: ScheduledChunk) {
        let Ok(samples) = chunk.frame.samples() else {
            tracing::warn!(chunk_id = chunk.id, "Dropping malformed output chunk");
            return;
        };
        let resampled = resample_linear(&samples, chunk.frame.sample_rate, self.device_rate);
        let samples = resampled.into_iter().map(|s| s as f32 / i16::MAX as f32).collect();
        self.state.lock().queue.push_back(PendingChunk { start: chunk.start, samples, pos: 0 });
    }

    fn cancel_all(&self) {
        self.state.lock().queue.clear();
    }

    fn set_gain(&self, gain: f32) {
        self.state.lock().gain = gain;
    }
}
