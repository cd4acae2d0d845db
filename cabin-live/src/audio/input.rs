//! Microphone capture gated on connection and mute state.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{INPUT_SAMPLE_RATE, PcmChunker};
use crate::error::AudioError;
use crate::gemini::{INPUT_AUDIO_MIME, MediaChunk};

/// Capacity of the device → forwarder sample queue.
const CAPTURE_QUEUE_DEPTH: usize = 64;

/// A microphone that delivers mono 16 kHz PCM16 samples.
///
/// Implementations convert from the device's native format themselves.
pub trait CaptureDevice: Send {
    /// Begin capturing into `tx`.
    fn start(&mut self, tx: mpsc::Sender<Vec<i16>>) -> Result<(), AudioError>;

    /// Stop capturing and release the device.
    fn stop(&mut self);

    /// Whether capture is active.
    fn is_running(&self) -> bool;
}

/// Destination for captured frames, normally the session client.
#[async_trait]
pub trait RealtimeInputSink: Send + Sync {
    /// Send media chunks. Returns whether a frame was written.
    async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> bool;
}

#[derive(Default)]
struct InputState {
    connected: bool,
    send_enabled: bool,
    forwarder: Option<JoinHandle<()>>,
}

struct InputInner {
    device: Mutex<Box<dyn CaptureDevice>>,
    sink: Arc<dyn RealtimeInputSink>,
    state: Mutex<InputState>,
    chunk_ms: u32,
}

/// Runs capture while the session is connected and the microphone is unmuted.
#[derive(Clone)]
pub struct AudioInputPipeline {
    inner: Arc<InputInner>,
}

impl AudioInputPipeline {
    /// Create a pipeline framing `chunk_ms` of audio per chunk.
    pub fn new(device: Box<dyn CaptureDevice>, sink: Arc<dyn RealtimeInputSink>, chunk_ms: u32) -> Self {
        Self {
            inner: Arc::new(InputInner {
                device: Mutex::new(device),
                sink,
                state: Mutex::new(InputState { send_enabled: true, ..Default::default() }),
                chunk_ms: chunk_ms.max(1),
            }),
        }
    }

    /// Update the connection half of the gate.
    pub fn set_connected(&self, connected: bool) -> Result<(), AudioError> {
        self.inner.state.lock().connected = connected;
        self.reconcile()
    }

    /// Update the mute half of the gate (`false` = muted).
    pub fn set_send_enabled(&self, enabled: bool) -> Result<(), AudioError> {
        self.inner.state.lock().send_enabled = enabled;
        self.reconcile()
    }

    /// Whether the send gate is open.
    pub fn send_enabled(&self) -> bool {
        self.inner.state.lock().send_enabled
    }

    /// Whether the device is currently capturing.
    pub fn is_capturing(&self) -> bool {
        self.inner.device.lock().is_running()
    }

    /// Stop capture regardless of the gate.
    pub fn stop(&self) {
        let forwarder = self.inner.state.lock().forwarder.take();
        self.halt(forwarder);
    }

    fn reconcile(&self) -> Result<(), AudioError> {
        let mut state = self.inner.state.lock();
        let desired = state.connected && state.send_enabled;
        let running = state.forwarder.is_some();

        if desired && !running {
            let (tx, rx) = mpsc::channel(CAPTURE_QUEUE_DEPTH);
            if let Err(e) = self.inner.device.lock().start(tx) {
                tracing::warn!(error = %e, "Microphone capture failed to start");
                return Err(e);
            }
            tracing::info!(chunk_ms = self.inner.chunk_ms, "Microphone capture started");
            state.forwarder = Some(tokio::spawn(forward(
                rx,
                Arc::clone(&self.inner.sink),
                PcmChunker::new(INPUT_SAMPLE_RATE, self.inner.chunk_ms),
            )));
        } else if !desired && running {
            let forwarder = state.forwarder.take();
            drop(state);
            self.halt(forwarder);
        }
        Ok(())
    }

    fn halt(&self, forwarder: Option<JoinHandle<()>>) {
        let mut device = self.inner.device.lock();
        if device.is_running() {
            device.stop();
            tracing::info!("Microphone capture stopped");
        }
        // Aborting drops the chunker along with its partial frame.
        if let Some(handle) = forwarder {
            handle.abort();
        }
    }
}

impl Drop for InputInner {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().forwarder.take() {
            handle.abort();
        }
        self.device.get_mut().stop();
    }
}

async fn forward(
    mut rx: mpsc::Receiver<Vec<i16>>,
    sink: Arc<dyn RealtimeInputSink>,
    mut chunker: PcmChunker,
) {
    while let Some(samples) = rx.recv().await {
        for frame in chunker.push(&samples) {
            let data = super::AudioFrame::from_samples(&frame, INPUT_SAMPLE_RATE).to_base64();
            sink.send_realtime_input(vec![MediaChunk { mime_type: INPUT_AUDIO_MIME.to_string(), data }])
                .await;
        }
    }
    tracing::debug!("Capture channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[derive(Default)]
    struct FakeMic {
        tx: Arc<Mutex<Option<mpsc::Sender<Vec<i16>>>>>,
        deny: bool,
    }

    impl CaptureDevice for FakeMic {
        fn start(&mut self, tx: mpsc::Sender<Vec<i16>>) -> Result<(), AudioError> {
            if self.deny {
                return Err(AudioError::PermissionDenied("denied in test".into()));
            }
            *self.tx.lock() = Some(tx);
            Ok(())
        }

        fn stop(&mut self) {
            self.tx.lock().take();
        }

        fn is_running(&self) -> bool {
            self.tx.lock().is_some()
        }
    }

    #[derive(Default)]
    struct Collect {
        chunks: Mutex<Vec<MediaChunk>>,
    }

    #[async_trait]
    impl RealtimeInputSink for Collect {
        async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> bool {
            self.chunks.lock().extend(chunks);
            true
        }
    }

    #[tokio::test]
    async fn test_capture_runs_only_when_connected_and_unmuted() {
        let tx_slot = Arc::new(Mutex::new(None));
        let mic = FakeMic { tx: Arc::clone(&tx_slot), deny: false };
        let pipeline = AudioInputPipeline::new(Box::new(mic), Arc::new(Collect::default()), 100);

        assert!(!pipeline.is_capturing());
        pipeline.set_send_enabled(false).unwrap();
        pipeline.set_connected(true).unwrap();
        assert!(!pipeline.is_capturing());

        pipeline.set_send_enabled(true).unwrap();
        assert!(pipeline.is_capturing());

        pipeline.set_connected(false).unwrap();
        assert!(!pipeline.is_capturing());
        assert!(tx_slot.lock().is_none());
    }

    #[tokio::test]
    async fn test_frames_are_100ms_pcm16_chunks() {
        let tx_slot = Arc::new(Mutex::new(None));
        let mic = FakeMic { tx: Arc::clone(&tx_slot), deny: false };
        let sink = Arc::new(Collect::default());
        let pipeline = AudioInputPipeline::new(Box::new(mic), sink.clone(), 100);
        pipeline.set_connected(true).unwrap();

        let tx = tx_slot.lock().clone().unwrap();
        tx.send(vec![7; 1000]).await.unwrap();
        tx.send(vec![7; 2500]).await.unwrap();

        for _ in 0..50 {
            if sink.chunks.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let chunks = sink.chunks.lock().clone();
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
            let bytes = base64::engine::general_purpose::STANDARD.decode(&chunk.data).unwrap();
            assert_eq!(bytes.len(), 3200);
        }
    }

    #[tokio::test]
    async fn test_permission_denied_is_reported_not_fatal() {
        let mic = FakeMic { deny: true, ..Default::default() };
        let pipeline = AudioInputPipeline::new(Box::new(mic), Arc::new(Collect::default()), 100);
        let err = pipeline.set_connected(true).unwrap_err();
        assert!(matches!(err, AudioError::PermissionDenied(_)));
        assert!(!pipeline.is_capturing());
        pipeline.set_connected(false).unwrap();
    }
}
