//! One live conversation with all its collaborators wired together.
//!
//! [`LiveSession`] owns a [`SessionClient`] and subscribes the transcript
//! assembler, tool dispatcher and audio pipelines to its event bus. Hosts
//! that want a different wiring can build the pieces themselves.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

use crate::audio::{
    AudioInputPipeline, AudioOutputPipeline, CaptureDevice, MonotonicClock, NullSink, PlaybackClock,
    PlaybackSink,
};
use crate::client::{SessionClient, SessionStatus};
use crate::config::{ClientSettings, SessionConfig};
use crate::error::{AudioError, Result};
use crate::events::{Part, SessionEvent, SessionListener, SubscriptionId};
use crate::log::{LogCategory, StreamingLog};
use crate::tools::{ToolContext, ToolDispatcher, ToolRegistry};
use crate::transcript::{ConversationTurn, Role, Transcript, TranscriptAssembler};
use crate::transport::Connector;

/// Opens the microphone gate on `Open` and closes it on `Close`.
struct CaptureGate {
    pipeline: AudioInputPipeline,
    transcript: Transcript,
    log: StreamingLog,
}

impl SessionListener for CaptureGate {
    fn on_event(&self, event: &SessionEvent) {
        let connected = match event {
            SessionEvent::Open => true,
            SessionEvent::Close { .. } => false,
            _ => return,
        };
        if let Err(e) = self.pipeline.set_connected(connected) {
            report_audio_error(&self.transcript, &self.log, &e);
        }
    }
}

fn report_audio_error(transcript: &Transcript, log: &StreamingLog, error: &AudioError) {
    tracing::warn!(error = %error, "Microphone unavailable, continuing without audio input");
    log.push(LogCategory::Audio, json!({ "error": error.to_string() }));
    transcript.push_system(format!("Microphone unavailable: {error}"));
}

/// Builder for [`LiveSession`].
pub struct LiveSessionBuilder {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    settings: ClientSettings,
    registry: ToolRegistry,
    context: ToolContext,
    transcript: Option<Transcript>,
    capture: Option<Box<dyn CaptureDevice>>,
    playback: Option<Arc<dyn PlaybackSink>>,
    clock: Option<Arc<dyn PlaybackClock>>,
}

impl LiveSessionBuilder {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            config: SessionConfig::default(),
            settings: ClientSettings::default(),
            registry: ToolRegistry::new(),
            context: ToolContext::new(),
            transcript: None,
            capture: None,
            playback: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Tools available to the agent. Their declarations are added to the config.
    pub fn tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(mut self, context: ToolContext) -> Self {
        self.context = context;
        self
    }

    /// Append to an existing transcript instead of a fresh one.
    pub fn transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Microphone to stream while connected. Without one the session is text-in only.
    pub fn capture_device(mut self, device: Box<dyn CaptureDevice>) -> Self {
        self.capture = Some(device);
        self
    }

    /// Speaker for agent audio. Defaults to discarding it.
    pub fn playback_sink(mut self, sink: Arc<dyn PlaybackSink>) -> Self {
        self.playback = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn PlaybackClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use the default system microphone and speaker.
    #[cfg(feature = "desktop-audio")]
    pub fn desktop_audio(mut self) -> std::result::Result<Self, AudioError> {
        use crate::audio::cpal_device::{CpalCaptureDevice, CpalPlaybackSink};

        let clock = self.clock.get_or_insert_with(|| Arc::new(MonotonicClock::new())).clone();
        self.playback = Some(Arc::new(CpalPlaybackSink::default_output(clock)?));
        self.capture = Some(Box::new(CpalCaptureDevice::default_input()?));
        Ok(self)
    }

    /// Wire everything together.
    pub fn build(self) -> Result<LiveSession> {
        let mut config = self.config;
        let declared = self.registry.definitions();
        for tool in &config.tools {
            if !self.registry.contains(&tool.name) {
                tracing::warn!(tool.name = %tool.name, "Declared tool has no handler");
            }
        }
        config.tools.retain(|t| !self.registry.contains(&t.name));
        config.tools.extend(declared);
        config.validate()?;

        let log = StreamingLog::new(self.settings.log_capacity);
        let client = SessionClient::builder(self.connector)
            .log(log.clone())
            .reconnect(self.settings.reconnect.clone())
            .build();
        let transcript = self.transcript.unwrap_or_default();

        let dispatcher = ToolDispatcher::new(
            self.registry,
            Arc::new(self.context),
            Arc::new(client.clone()),
            transcript.clone(),
            log.clone(),
        );
        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let playback = Arc::new(AudioOutputPipeline::new(
            self.playback.unwrap_or_else(|| Arc::new(NullSink)),
            clock,
            self.settings.playback_lead(),
        ));
        let capture = self.capture.map(|device| {
            AudioInputPipeline::new(device, Arc::new(client.clone()), self.settings.input_chunk_ms)
        });

        let mut subscriptions = vec![
            client.subscribe(Arc::new(TranscriptAssembler::new(transcript.clone()))),
            client.subscribe(Arc::new(dispatcher.clone())),
            client.subscribe(playback.clone()),
        ];
        if let Some(pipeline) = &capture {
            subscriptions.push(client.subscribe(Arc::new(CaptureGate {
                pipeline: pipeline.clone(),
                transcript: transcript.clone(),
                log: log.clone(),
            })));
        }

        tracing::debug!(
            model = %config.model,
            tools = config.tools.len(),
            capture = capture.is_some(),
            "Live session assembled"
        );

        Ok(LiveSession { client, config, transcript, dispatcher, playback, capture, subscriptions })
    }
}

/// A conversation: session client, transcript, tools and audio.
///
/// Call [`disconnect`](Self::disconnect) before dropping a connected session;
/// dropping only detaches the listeners.
pub struct LiveSession {
    client: SessionClient,
    config: SessionConfig,
    transcript: Transcript,
    dispatcher: ToolDispatcher,
    playback: Arc<AudioOutputPipeline>,
    capture: Option<AudioInputPipeline>,
    subscriptions: Vec<SubscriptionId>,
}

impl LiveSession {
    pub fn builder(connector: Arc<dyn Connector>) -> LiveSessionBuilder {
        LiveSessionBuilder::new(connector)
    }

    /// Connect with the session's configuration. See [`SessionClient::connect`].
    pub async fn connect(&self) -> bool {
        self.client.connect(self.config.clone()).await
    }

    /// Stop capture, flush playback, abort tools and close the connection.
    pub async fn disconnect(&self) {
        if let Some(capture) = &self.capture {
            capture.stop();
        }
        self.playback.stop();
        self.dispatcher.cancel_all();
        self.client.disconnect().await;
    }

    /// Mute or unmute the microphone. Takes effect immediately when connected.
    pub fn set_muted(&self, muted: bool) -> std::result::Result<(), AudioError> {
        let Some(capture) = &self.capture else {
            return Ok(());
        };
        capture.set_send_enabled(!muted).inspect_err(|e| {
            report_audio_error(&self.transcript, self.client.log(), e);
        })
    }

    pub fn is_muted(&self) -> bool {
        self.capture.as_ref().is_none_or(|c| !c.send_enabled())
    }

    /// Set playback volume, clamped to `0.0..=1.0`.
    pub fn set_volume(&self, volume: f32) {
        self.playback.set_gain(volume);
    }

    pub fn volume(&self) -> f32 {
        self.playback.gain()
    }

    /// Send a typed user message as a complete turn.
    ///
    /// The message is recorded in the transcript first; if it cannot be sent
    /// a system turn says so.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.trim().is_empty() {
            return false;
        }
        self.transcript.push(ConversationTurn::new(Role::User, text.clone(), true));
        let sent = self.client.send(vec![Part::text(text)], true).await;
        if !sent {
            self.transcript.push_system("Message not sent: not connected");
        }
        sent
    }

    pub fn status(&self) -> SessionStatus {
        self.client.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.client.watch_status()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn log(&self) -> &StreamingLog {
        self.client.log()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the agent is waiting on tool results.
    pub fn awaiting_tool_response(&self) -> watch::Receiver<bool> {
        self.dispatcher.awaiting()
    }

    pub fn client(&self) -> &SessionClient {
        &self.client
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn playback(&self) -> &AudioOutputPipeline {
        &self.playback
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.client.unsubscribe(id);
        }
        if let Some(capture) = &self.capture {
            capture.stop();
        }
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("status", &self.status())
            .field("model", &self.config.model)
            .field("turns", &self.transcript.len())
            .finish()
    }
}
