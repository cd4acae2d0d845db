//! Gap-free scheduling of agent audio.
//!
//! The pipeline owns a playback timeline. The first chunk after an idle
//! period starts at `now + lead`; every following chunk starts where the
//! previous one ends. If playback has already run past the tail (underrun),
//! the timeline is re-seeded at `now + lead`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::AudioFrame;
use crate::events::{SessionEvent, SessionListener};

/// Source of playback time.
pub trait PlaybackClock: Send + Sync {
    /// Time elapsed since the clock's origin. Never decreases.
    fn now(&self) -> Duration;
}

/// [`Instant`]-based clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a clock at zero.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests and offline rendering.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// A chunk placed on the playback timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledChunk {
    /// Sequence number, unique per pipeline.
    pub id: u64,
    /// When playback of this chunk begins.
    pub start: Duration,
    /// When playback of this chunk ends.
    pub end: Duration,
    /// The audio.
    pub frame: AudioFrame,
}

/// Speaker side of the pipeline.
pub trait PlaybackSink: Send + Sync {
    /// Queue a chunk for playback at its start time.
    fn schedule(&self, chunk: ScheduledChunk);

    /// Drop every chunk that has not finished playing.
    fn cancel_all(&self);

    /// Set the output gain, already clamped to `0.0..=1.0`. Applied at render time.
    fn set_gain(&self, gain: f32);
}

/// Sink that discards audio, for text-only hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn schedule(&self, _chunk: ScheduledChunk) {}
    fn cancel_all(&self) {}
    fn set_gain(&self, _gain: f32) {}
}

struct Timeline {
    next_start: Option<Duration>,
    next_id: u64,
    gain: f32,
}

struct OutputInner {
    clock: Arc<dyn PlaybackClock>,
    sink: Arc<dyn PlaybackSink>,
    lead: Duration,
    timeline: Mutex<Timeline>,
}

/// Schedules agent audio onto a [`PlaybackSink`].
#[derive(Clone)]
pub struct AudioOutputPipeline {
    inner: Arc<OutputInner>,
}

impl AudioOutputPipeline {
    /// Create a pipeline with the given lead time.
    pub fn new(sink: Arc<dyn PlaybackSink>, clock: Arc<dyn PlaybackClock>, lead: Duration) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                clock,
                sink,
                lead,
                timeline: Mutex::new(Timeline { next_start: None, next_id: 0, gain: 1.0 }),
            }),
        }
    }

    /// Place a frame on the timeline and hand it to the sink.
    ///
    /// Empty frames are ignored.
    pub fn enqueue(&self, frame: AudioFrame) -> Option<ScheduledChunk> {
        let duration = frame.duration();
        if duration.is_zero() {
            return None;
        }

        let chunk = {
            let mut timeline = self.inner.timeline.lock();
            let now = self.inner.clock.now();
            let start = match timeline.next_start {
                Some(tail) if tail >= now => tail,
                Some(tail) => {
                    tracing::debug!(underrun_ms = (now - tail).as_millis() as u64, "Playback underrun");
                    now + self.inner.lead
                }
                None => now + self.inner.lead,
            };
            let end = start + duration;
            timeline.next_start = Some(end);
            let id = timeline.next_id;
            timeline.next_id += 1;
            ScheduledChunk { id, start, end, frame }
        };

        self.inner.sink.schedule(chunk.clone());
        Some(chunk)
    }

    /// Cancel everything not yet played and reset the timeline.
    pub fn stop(&self) {
        self.inner.timeline.lock().next_start = None;
        self.inner.sink.cancel_all();
    }

    /// Set output volume, clamped to `0.0..=1.0`.
    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.inner.timeline.lock().gain = gain;
        self.inner.sink.set_gain(gain);
    }

    /// Current output volume.
    pub fn gain(&self) -> f32 {
        self.inner.timeline.lock().gain
    }

    /// End of the last scheduled chunk, if playback is pending.
    pub fn scheduled_until(&self) -> Option<Duration> {
        self.inner.timeline.lock().next_start
    }
}

impl SessionListener for AudioOutputPipeline {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Audio(frame) => {
                self.enqueue(frame.clone());
            }
            SessionEvent::Interrupted | SessionEvent::Close { .. } => self.stop(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Default)]
    struct RecordingSink {
        scheduled: Mutex<Vec<ScheduledChunk>>,
        cancels: Mutex<usize>,
        gain: Mutex<f32>,
    }

    impl PlaybackSink for RecordingSink {
        fn schedule(&self, chunk: ScheduledChunk) {
            self.scheduled.lock().push(chunk);
        }
        fn cancel_all(&self) {
            *self.cancels.lock() += 1;
        }
        fn set_gain(&self, gain: f32) {
            *self.gain.lock() = gain;
        }
    }

    fn frame_ms(ms: u64) -> AudioFrame {
        AudioFrame::from_samples(&vec![0; (24 * ms) as usize], 24_000)
    }

    fn pipeline() -> (AudioOutputPipeline, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(RecordingSink::default());
        let out = AudioOutputPipeline::new(sink.clone(), clock.clone(), Duration::from_millis(100));
        (out, clock, sink)
    }

    #[test]
    fn test_first_chunk_waits_for_lead_then_chains() {
        let (out, clock, _) = pipeline();
        clock.advance(Duration::from_secs(1));

        let a = out.enqueue(frame_ms(40)).unwrap();
        let b = out.enqueue(frame_ms(60)).unwrap();
        assert_eq!(a.start, Duration::from_millis(1100));
        assert_eq!(b.start, a.end);
        assert_eq!(b.end, Duration::from_millis(1200));
    }

    #[test]
    fn test_underrun_reseeds_at_now_plus_lead() {
        let (out, clock, _) = pipeline();
        let a = out.enqueue(frame_ms(20)).unwrap();
        clock.advance(Duration::from_millis(500));
        let b = out.enqueue(frame_ms(20)).unwrap();
        assert!(b.start > a.end);
        assert_eq!(b.start, Duration::from_millis(600));
    }

    #[test]
    fn test_stop_cancels_and_resets() {
        let (out, clock, sink) = pipeline();
        out.enqueue(frame_ms(500));
        clock.advance(Duration::from_millis(50));
        out.on_event(&SessionEvent::Interrupted);
        assert_eq!(*sink.cancels.lock(), 1);
        assert!(out.scheduled_until().is_none());

        let next = out.enqueue(frame_ms(10)).unwrap();
        assert_eq!(next.start, Duration::from_millis(150));
    }

    #[test]
    fn test_gain_is_clamped_and_forwarded() {
        let (out, _, sink) = pipeline();
        out.set_gain(1.7);
        assert_eq!(out.gain(), 1.0);
        out.set_gain(-0.2);
        assert_eq!(*sink.gain.lock(), 0.0);
        out.set_gain(f32::NAN);
        assert_eq!(out.gain(), 0.0);
        out.set_gain(0.35);
        assert_eq!(out.gain(), 0.35);
    }

    #[test]
    fn test_empty_frames_are_ignored() {
        let (out, _, sink) = pipeline();
        assert!(out.enqueue(AudioFrame::new(Vec::<u8>::new(), 24_000)).is_none());
        assert!(sink.scheduled.lock().is_empty());
    }

    proptest! {
        /// Start times never decrease, whatever the mix of chunk lengths and clock jumps.
        #[test]
        fn prop_schedule_is_monotonic(steps in prop::collection::vec((1u64..400, 0u64..600), 1..60)) {
            let (out, clock, _) = pipeline();
            let mut last_start = Duration::ZERO;
            let mut last_end = Duration::ZERO;
            for (len_ms, gap_ms) in steps {
                clock.advance(Duration::from_millis(gap_ms));
                let chunk = out.enqueue(frame_ms(len_ms)).unwrap();
                prop_assert!(chunk.start >= last_start);
                prop_assert!(chunk.start >= last_end);
                prop_assert!(chunk.start >= clock.now());
                last_start = chunk.start;
                last_end = chunk.end;
            }
        }
    }
}
