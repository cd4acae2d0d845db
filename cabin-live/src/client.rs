//! The duplex session client.
//!
//! [`SessionClient`] owns one connection at a time and drives the
//! `disconnected → connecting → connected → disconnected` state machine.
//! Inbound frames are read on a single task, demultiplexed into
//! [`SessionEvent`]s, and emitted synchronously on the [`EventBus`] in arrival
//! order. Every session change bumps a generation counter so that readers and
//! connect attempts belonging to an older connection retire themselves.
//!
//! Status transitions are serialized: a transition updates the state and
//! announces it (`StatusChanged`, `Open`, `Close`) before the next one can
//! start, so listeners and `watch_status()` always agree with `status()`.

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::audio::{AudioFrame, OUTPUT_SAMPLE_RATE, RealtimeInputSink, rate_from_mime};
use crate::config::{ReconnectPolicy, SessionConfig};
use crate::error::{LiveError, Result};
use crate::events::{
    EventBus, EventSubscription, ModelContent, Part, SessionEvent, SessionListener, SubscriptionId,
    ToolResponse,
};
use crate::gemini::{ClientMessage, MediaChunk, ServerMessage};
use crate::log::{LogCategory, StreamingLog};
use crate::tools::ToolResponder;
use crate::transport::{BoxedFrameSink, BoxedFrameSource, Connector, InboundFrame};

/// Close code used when the transport vanished without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Close code of a local `disconnect()`.
pub const NORMAL_CLOSE: u16 = 1000;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// No connection.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The setup frame has been written; the session is live.
    Connected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

struct ClientState {
    status: SessionStatus,
    generation: u64,
    session_id: Option<String>,
    config: Option<SessionConfig>,
    reader: Option<JoinHandle<()>>,
    /// Cancelled when a pending reconnect loop must stop.
    reconnect: Option<CancellationToken>,
}

/// Outbound half of the live connection, tagged with its generation.
struct ActiveSink {
    generation: u64,
    sink: BoxedFrameSink,
}

struct ClientInner {
    connector: Arc<dyn Connector>,
    bus: EventBus,
    log: StreamingLog,
    reconnect_policy: Option<ReconnectPolicy>,
    /// Held across a state change and its announcement. Never held over an await.
    transitions: Mutex<()>,
    state: Mutex<ClientState>,
    sink: tokio::sync::Mutex<Option<ActiveSink>>,
    status_tx: watch::Sender<SessionStatus>,
}

/// Builder for [`SessionClient`].
pub struct SessionClientBuilder {
    connector: Arc<dyn Connector>,
    log: Option<StreamingLog>,
    bus: Option<EventBus>,
    reconnect: Option<ReconnectPolicy>,
}

impl SessionClientBuilder {
    /// Share an existing streaming log.
    pub fn log(mut self, log: StreamingLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Emit on an existing bus.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Reconnect automatically after remote closes and transport errors.
    pub fn reconnect(mut self, policy: Option<ReconnectPolicy>) -> Self {
        self.reconnect = policy;
        self
    }

    /// Build the client.
    pub fn build(self) -> SessionClient {
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);
        SessionClient {
            inner: Arc::new(ClientInner {
                connector: self.connector,
                bus: self.bus.unwrap_or_default(),
                log: self.log.unwrap_or_default(),
                reconnect_policy: self.reconnect,
                transitions: Mutex::new(()),
                state: Mutex::new(ClientState {
                    status: SessionStatus::Disconnected,
                    generation: 0,
                    session_id: None,
                    config: None,
                    reader: None,
                    reconnect: None,
                }),
                sink: tokio::sync::Mutex::new(None),
                status_tx,
            }),
        }
    }
}

/// Owns the duplex connection to the remote agent.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

impl SessionClient {
    /// Create a client with default settings.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::builder(connector).build()
    }

    /// Start building a client.
    pub fn builder(connector: Arc<dyn Connector>) -> SessionClientBuilder {
        SessionClientBuilder { connector, log: None, bus: None, reconnect: None }
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    /// Watch status transitions.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// ID of the current connection, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    /// Configuration of the most recent connect.
    pub fn config(&self) -> Option<SessionConfig> {
        self.inner.state.lock().config.clone()
    }

    /// The event bus.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The streaming log.
    pub fn log(&self) -> &StreamingLog {
        &self.inner.log
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: Arc<dyn SessionListener>) -> SubscriptionId {
        self.inner.bus.subscribe(listener)
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    /// Subscribe through an async channel.
    pub fn subscribe_channel(&self) -> EventSubscription {
        self.inner.bus.subscribe_channel()
    }

    /// Open a session.
    ///
    /// Returns false without side effects if a connection is already
    /// connecting or connected. Connection failures are reported through an
    /// `Error` event and leave the client disconnected. A manual connect stops
    /// any pending reconnect loop.
    pub async fn connect(&self, config: SessionConfig) -> bool {
        self.connect_guarded(config, None).await
    }

    /// Connect unless `guard` has been cancelled. The check happens under the
    /// state lock, where `disconnect()` cancels it.
    async fn connect_guarded(&self, config: SessionConfig, guard: Option<&CancellationToken>) -> bool {
        let invalid = config.validate().err();

        let attempt = {
            let _transition = self.inner.transitions.lock();
            let attempt = {
                let mut state = self.inner.state.lock();
                if guard.is_some_and(CancellationToken::is_cancelled) {
                    return false;
                }
                if state.status != SessionStatus::Disconnected {
                    tracing::warn!(status = %state.status, "Connect rejected: session already active");
                    return false;
                }
                if invalid.is_some() {
                    None
                } else {
                    if guard.is_none() {
                        if let Some(pending) = state.reconnect.take() {
                            pending.cancel();
                        }
                    }
                    state.generation += 1;
                    state.status = SessionStatus::Connecting;
                    let session_id = uuid::Uuid::new_v4().to_string();
                    state.session_id = Some(session_id.clone());
                    state.config = Some(config.clone());
                    Some((state.generation, session_id))
                }
            };
            if attempt.is_some() {
                self.inner.publish_status(SessionStatus::Connecting);
            }
            attempt
        };

        let Some((generation, session_id)) = attempt else {
            if let Some(e) = invalid {
                tracing::warn!(error = %e, "Rejecting connect with invalid configuration");
                self.inner.report_error(&e);
            }
            return false;
        };

        let span = cabin_telemetry::session_span(&config.model, &session_id);
        self.inner.log.push(
            LogCategory::Lifecycle,
            json!({ "event": "connecting", "model": config.model, "session_id": session_id }),
        );

        match self.open(&config).instrument(span.clone()).await {
            Ok((sink, source)) => self.establish(generation, sink, source, span).await,
            Err(e) => {
                tracing::warn!(parent: &span, error = %e, "Connect failed");
                let _transition = self.inner.transitions.lock();
                let current = {
                    let mut state = self.inner.state.lock();
                    let current = state.generation == generation;
                    if current {
                        state.status = SessionStatus::Disconnected;
                        state.session_id = None;
                    }
                    current
                };
                if current {
                    self.inner.publish_status(SessionStatus::Disconnected);
                    self.inner.report_error(&e);
                }
                false
            }
        }
    }

    async fn open(&self, config: &SessionConfig) -> Result<(BoxedFrameSink, BoxedFrameSource)> {
        let connection = self.inner.connector.open().await?;
        let mut sink = connection.sink;

        let setup = ClientMessage::setup(config);
        let frame = setup.to_frame()?;
        tracing::info!(model_id = %config.model, "Sending setup message");
        tracing::debug!(raw_setup = %frame, "Raw setup message");
        sink.send(frame).await?;
        self.inner.log_outbound(&setup);

        Ok((sink, connection.source))
    }

    async fn establish(
        &self,
        generation: u64,
        sink: BoxedFrameSink,
        source: BoxedFrameSource,
        span: tracing::Span,
    ) -> bool {
        let mut slot = self.inner.sink.lock().await;
        let (stale, rejected) = {
            let _transition = self.inner.transitions.lock();
            let current = {
                let mut state = self.inner.state.lock();
                let current = state.generation == generation;
                if current {
                    state.status = SessionStatus::Connected;
                }
                current
            };
            if current {
                let stale = slot.replace(ActiveSink { generation, sink });
                drop(slot);
                tracing::info!(parent: &span, "Session connected");
                self.inner.log.push(LogCategory::Lifecycle, json!({ "event": "open" }));
                self.inner.publish_status(SessionStatus::Connected);
                self.inner.bus.emit(&SessionEvent::Open);
                (stale.map(|active| active.sink), None)
            } else {
                drop(slot);
                (None, Some(sink))
            }
        };

        if let Some(sink) = stale {
            close_sink(sink).await;
        }
        if let Some(sink) = rejected {
            tracing::debug!(parent: &span, "Connect superseded by disconnect");
            close_sink(sink).await;
            return false;
        }

        let reader = tokio::spawn(read_loop(self.clone(), source, generation).instrument(span));
        let mut state = self.inner.state.lock();
        if state.generation == generation {
            state.reader = Some(reader);
        } else {
            reader.abort();
        }
        true
    }

    /// Close the session. Safe to call in any state; only the first call
    /// after a connection emits `Close`.
    ///
    /// The status change and `Close` are announced before the transport is
    /// shut down, so a connect issued while the old socket is still closing
    /// is never followed by a stale `Close`.
    pub async fn disconnect(&self) {
        let generation = {
            let _transition = self.inner.transitions.lock();
            let (generation, previous, reader) = {
                let mut state = self.inner.state.lock();
                state.generation += 1;
                if let Some(pending) = state.reconnect.take() {
                    pending.cancel();
                }
                let previous = state.status;
                state.status = SessionStatus::Disconnected;
                state.session_id = None;
                (state.generation, previous, state.reader.take())
            };
            if let Some(task) = reader {
                task.abort();
            }
            if previous != SessionStatus::Disconnected {
                tracing::info!("Session disconnected");
                self.inner.log.push(
                    LogCategory::Lifecycle,
                    json!({ "event": "close", "code": NORMAL_CLOSE, "reason": "client disconnect" }),
                );
                self.inner.publish_status(SessionStatus::Disconnected);
                self.inner.bus.emit(&SessionEvent::Close {
                    code: NORMAL_CLOSE,
                    reason: "client disconnect".to_string(),
                });
            }
            generation
        };

        if let Some(sink) = self.take_sink_before(generation).await {
            close_sink(sink).await;
        }
    }

    /// Take the stored sink if it belongs to a connection older than `generation`.
    async fn take_sink_before(&self, generation: u64) -> Option<BoxedFrameSink> {
        let mut slot = self.inner.sink.lock().await;
        if slot.as_ref().is_some_and(|active| active.generation < generation) {
            slot.take().map(|active| active.sink)
        } else {
            None
        }
    }

    /// Send one logical turn made of `parts`.
    pub async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> bool {
        self.send_message(ClientMessage::client_content(parts, turn_complete), "send").await
    }

    /// Inject low-latency text as realtime input.
    pub async fn send_realtime_text(&self, text: impl Into<String>) -> bool {
        self.send_message(ClientMessage::realtime_text(text), "send_realtime_text").await
    }

    /// Stream audio or image chunks, one frame per chunk.
    ///
    /// Returns whether at least one frame was written. Benign "socket closing"
    /// failures are swallowed; anything else is logged.
    pub async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> bool {
        if self.status() != SessionStatus::Connected {
            tracing::warn!(chunks = chunks.len(), "Dropping realtime input: session not connected");
            return false;
        }
        let mut written = false;
        for chunk in chunks {
            match self.write(ClientMessage::media(vec![chunk])).await {
                Ok(()) => written = true,
                Err(e) if e.is_benign_close() => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Realtime input chunk failed");
                    self.inner.log.push(
                        LogCategory::Diagnostic,
                        json!({ "op": "send_realtime_input", "error": e.to_string() }),
                    );
                }
            }
        }
        written
    }

    /// Return tool results. Empty responses are not sent.
    pub async fn send_tool_response(&self, response: ToolResponse) -> bool {
        if response.is_empty() {
            tracing::debug!("Skipping empty tool response");
            return false;
        }
        self.send_message(ClientMessage::tool_response(response), "send_tool_response").await
    }

    async fn send_message(&self, msg: ClientMessage, op: &'static str) -> bool {
        match self.write(msg).await {
            Ok(()) => true,
            Err(LiveError::NotConnected) => {
                tracing::warn!(op, "Dropping outbound frame: session not connected");
                false
            }
            Err(e) if e.is_benign_close() => {
                tracing::debug!(op, "Dropping outbound frame: connection closing");
                false
            }
            Err(e) => {
                tracing::warn!(op, error = %e, "Outbound frame failed");
                self.inner.log.push(LogCategory::Diagnostic, json!({ "op": op, "error": e.to_string() }));
                false
            }
        }
    }

    async fn write(&self, msg: ClientMessage) -> Result<()> {
        if self.status() != SessionStatus::Connected {
            return Err(LiveError::NotConnected);
        }
        let frame = msg.to_frame()?;
        let mut slot = self.inner.sink.lock().await;
        let active = slot.as_mut().ok_or(LiveError::NotConnected)?;
        active.sink.send(frame).instrument(cabin_telemetry::frame_span("send", msg.kind())).await?;
        drop(slot);
        self.inner.log_outbound(&msg);
        Ok(())
    }

    fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    fn handle_text(&self, raw: &str) {
        let mut value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping non-JSON frame");
                self.inner.log.push(
                    LogCategory::Diagnostic,
                    json!({ "error": format!("Parse error: {}", e), "bytes": raw.len() }),
                );
                return;
            }
        };

        let msg = match ServerMessage::from_value(&value) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unrecognized frame");
                self.inner.log.push(LogCategory::Diagnostic, json!({ "error": e.to_string() }));
                return;
            }
        };

        redact_media(&mut value);
        self.inner.log.push(LogCategory::ServerReceive, value);

        if !msg.dropped_fields.is_empty() {
            tracing::warn!(fields = ?msg.dropped_fields, "Dropped malformed fields from server frame");
            self.inner.log.push(LogCategory::Diagnostic, json!({ "dropped_fields": msg.dropped_fields }));
        }

        for event in demultiplex(msg) {
            self.inner.bus.emit(&event);
        }
    }

    /// Called by the reader when its connection ends.
    async fn on_remote_end(&self, generation: u64, code: u16, reason: String, error: Option<LiveError>) {
        let ended = {
            let _transition = self.inner.transitions.lock();
            let ended = {
                let mut state = self.inner.state.lock();
                if state.generation != generation || state.status == SessionStatus::Disconnected {
                    None
                } else {
                    state.generation += 1;
                    state.status = SessionStatus::Disconnected;
                    state.session_id = None;
                    state.reader = None;
                    Some(state.generation)
                }
            };
            if ended.is_some() {
                if let Some(e) = &error {
                    self.inner.report_error(e);
                }
                tracing::info!(code, reason = %reason, "Session closed by remote");
                self.inner
                    .log
                    .push(LogCategory::Lifecycle, json!({ "event": "close", "code": code, "reason": reason }));
                self.inner.publish_status(SessionStatus::Disconnected);
                self.inner.bus.emit(&SessionEvent::Close { code, reason });
            }
            ended
        };
        let Some(closed_at) = ended else {
            return;
        };

        drop(self.take_sink_before(closed_at).await);
        self.schedule_reconnect(closed_at);
    }

    /// Start the backoff loop for the connection that ended at `closed_at`.
    fn schedule_reconnect(&self, closed_at: u64) {
        let Some(policy) = self.inner.reconnect_policy.clone() else {
            return;
        };
        let Some(config) = self.config() else {
            return;
        };
        let token = CancellationToken::new();
        {
            let mut state = self.inner.state.lock();
            if state.generation != closed_at || state.status != SessionStatus::Disconnected {
                return;
            }
            if let Some(previous) = state.reconnect.replace(token.clone()) {
                previous.cancel();
            }
        }

        let client = self.clone();
        tokio::spawn(async move {
            for attempt in 0..policy.max_attempts {
                let delay = policy.delay_for(attempt);
                tracing::info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if client.connect_guarded(config.clone(), Some(&token)).await {
                    return;
                }
                if token.is_cancelled() || client.status() != SessionStatus::Disconnected {
                    return;
                }
            }
            tracing::warn!(attempts = policy.max_attempts, "Reconnect gave up");
            client.inner.log.push(
                LogCategory::Lifecycle,
                json!({ "event": "reconnect_exhausted", "attempts": policy.max_attempts }),
            );
        });
    }
}

async fn close_sink(mut sink: BoxedFrameSink) {
    if let Err(e) = sink.close().await {
        if !e.is_benign_close() {
            tracing::debug!(error = %e, "Error while closing connection");
        }
    }
}

impl ClientInner {
    fn publish_status(&self, status: SessionStatus) {
        self.status_tx.send_replace(status);
        tracing::debug!(status = %status, "Status changed");
        self.bus.emit(&SessionEvent::StatusChanged(status));
    }

    fn report_error(&self, error: &LiveError) {
        self.log.push(LogCategory::Diagnostic, json!({ "error": error.to_string() }));
        self.bus.emit(&SessionEvent::Error(error.to_string()));
    }

    fn log_outbound(&self, msg: &ClientMessage) {
        match serde_json::to_value(msg) {
            Ok(mut value) => {
                redact_media(&mut value);
                self.log.push(LogCategory::ClientSend, value);
            }
            Err(e) => tracing::debug!(error = %e, "Could not log outbound frame"),
        }
    }
}

async fn read_loop(client: SessionClient, mut source: BoxedFrameSource, generation: u64) {
    while let Some(frame) = source.next().await {
        if client.generation() != generation {
            return;
        }
        match frame {
            Ok(InboundFrame::Text(raw)) => {
                let _span = cabin_telemetry::frame_span("receive", "text").entered();
                client.handle_text(&raw);
            }
            Ok(InboundFrame::Close { code, reason }) => {
                client.on_remote_end(generation, code, reason, None).await;
                return;
            }
            Err(e) if e.is_benign_close() => {
                client.on_remote_end(generation, ABNORMAL_CLOSE, e.to_string(), None).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transport error");
                let reason = e.to_string();
                client.on_remote_end(generation, ABNORMAL_CLOSE, reason, Some(e)).await;
                return;
            }
        }
    }
    client.on_remote_end(generation, ABNORMAL_CLOSE, "connection lost".to_string(), None).await;
}

/// Split one server message into events, in emission order.
///
/// `interrupted` ends processing of the message.
pub(crate) fn demultiplex(msg: ServerMessage) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    if msg.setup_complete {
        events.push(SessionEvent::SetupComplete);
    }
    if let Some(calls) = msg.tool_calls.filter(|c| !c.is_empty()) {
        events.push(SessionEvent::ToolCall(calls));
    }
    if let Some(ids) = msg.cancelled_ids.filter(|ids| !ids.is_empty()) {
        events.push(SessionEvent::ToolCallCancellation(ids));
    }

    let Some(content) = msg.server_content else {
        return events;
    };

    if content.interrupted {
        events.push(SessionEvent::Interrupted);
        return events;
    }

    if let Some(t) = content.input_transcription {
        events.push(SessionEvent::InputTranscription { text: t.text, is_final: t.is_final });
    }
    if let Some(t) = content.output_transcription {
        events.push(SessionEvent::OutputTranscription { text: t.text, is_final: t.is_final });
    }

    let (audio, other): (Vec<Part>, Vec<Part>) =
        content.model_turn.unwrap_or_default().into_iter().partition(Part::is_audio);

    for part in audio {
        let Some(blob) = part.inline_data else { continue };
        match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
            Ok(bytes) => {
                let rate = rate_from_mime(&blob.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE);
                events.push(SessionEvent::Audio(AudioFrame::new(bytes, rate)));
            }
            Err(e) => tracing::warn!(error = %e, "Dropping undecodable audio part"),
        }
    }

    let grounding = content.grounding.unwrap_or_default();
    if !other.is_empty() || !grounding.is_empty() {
        events.push(SessionEvent::Content(ModelContent { parts: other, grounding }));
    }

    if content.turn_complete {
        events.push(SessionEvent::TurnComplete);
    }
    if content.generation_complete {
        events.push(SessionEvent::GenerationComplete);
    }
    events
}

/// Replace inline media payloads with their size so logs stay small.
fn redact_media(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_media = map.contains_key("mimeType");
            for (key, child) in map.iter_mut() {
                if is_media && key == "data" {
                    if let Value::String(data) = child {
                        *child = json!(format!("<{} base64 chars>", data.len()));
                    }
                } else {
                    redact_media(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_media),
        _ => {}
    }
}

#[async_trait]
impl ToolResponder for SessionClient {
    async fn send_tool_response(&self, response: ToolResponse) -> bool {
        SessionClient::send_tool_response(self, response).await
    }
}

#[async_trait]
impl RealtimeInputSink for SessionClient {
    async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> bool {
        SessionClient::send_realtime_input(self, chunks).await
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("status", &self.status())
            .field("session_id", &self.session_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Blob;
    use serde_json::json;

    fn parse(value: Value) -> ServerMessage {
        ServerMessage::from_value(&value).unwrap()
    }

    fn kinds(events: &[SessionEvent]) -> Vec<&'static str> {
        events.iter().map(SessionEvent::kind).collect()
    }

    #[test]
    fn test_audio_and_text_are_never_mixed() {
        let audio = base64::engine::general_purpose::STANDARD.encode([1u8, 0, 2, 0]);
        let events = demultiplex(parse(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": audio } },
                { "text": "Hi" },
                { "inlineData": { "mimeType": "audio/pcm", "data": audio } },
                { "text": " there" }
            ]}}
        })));

        assert_eq!(kinds(&events), vec!["audio", "audio", "content"]);
        let SessionEvent::Audio(frame) = &events[1] else { panic!("expected audio") };
        assert_eq!(frame.sample_rate, OUTPUT_SAMPLE_RATE);
        assert_eq!(frame.data.as_ref(), &[1, 0, 2, 0]);
        let SessionEvent::Content(content) = &events[2] else { panic!("expected content") };
        assert_eq!(content.text(), "Hi there");
        assert!(content.parts.iter().all(|p| !p.is_audio()));
    }

    #[test]
    fn test_emission_order_within_one_message() {
        let events = demultiplex(parse(json!({
            "setupComplete": {},
            "toolCall": { "functionCalls": [{ "id": "c1", "name": "find_stations" }] },
            "toolCallCancellation": { "ids": ["c0"] },
            "serverContent": {
                "inputTranscription": { "text": "find", "isFinal": true },
                "outputTranscription": { "text": "Sure", "isFinal": false },
                "modelTurn": { "parts": [{ "text": "Sure" }] },
                "turnComplete": true,
                "generationComplete": true
            }
        })));
        assert_eq!(
            kinds(&events),
            vec![
                "setupcomplete",
                "toolcall",
                "toolcallcancellation",
                "inputTranscription",
                "outputTranscription",
                "content",
                "turncomplete",
                "generationcomplete"
            ]
        );
    }

    #[test]
    fn test_interrupted_short_circuits() {
        let events = demultiplex(parse(json!({
            "serverContent": {
                "interrupted": true,
                "modelTurn": { "parts": [{ "text": "stale" }] },
                "turnComplete": true
            }
        })));
        assert_eq!(kinds(&events), vec!["interrupted"]);
    }

    #[test]
    fn test_grounding_only_message_yields_empty_content() {
        let events = demultiplex(parse(json!({
            "serverContent": { "groundingMetadata": { "groundingChunks": [
                { "web": { "uri": "https://example.org", "title": "Example" } }
            ]}}
        })));
        let [SessionEvent::Content(content)] = events.as_slice() else { panic!("expected content") };
        assert!(content.parts.is_empty());
        assert_eq!(content.grounding[0].uri, "https://example.org");
    }

    #[test]
    fn test_undecodable_audio_is_skipped() {
        let mut msg = ServerMessage::default();
        msg.server_content = Some(crate::gemini::ServerContent {
            model_turn: Some(vec![Part {
                inline_data: Some(Blob { mime_type: "audio/pcm".into(), data: "!!!".into() }),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(demultiplex(msg).is_empty());
    }

    #[test]
    fn test_redact_media_replaces_payloads() {
        let mut value = json!({
            "realtimeInput": { "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AAAA" }] },
            "other": { "data": "kept" }
        });
        redact_media(&mut value);
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["data"], "<4 base64 chars>");
        assert_eq!(value["other"]["data"], "kept");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Connecting.to_string(), "connecting");
    }
}
