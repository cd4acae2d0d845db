//! Session events and the listener bus that fans them out.
//!
//! Every inbound frame is demultiplexed into one or more [`SessionEvent`]s,
//! which are delivered synchronously and in arrival order to each listener
//! registered on the [`EventBus`].

use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::audio::AudioFrame;
use crate::client::SessionStatus;

// ── Content parts ───────────────────────────────────────────────────────

/// Inline binary payload of a part, base64 on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// MIME type, e.g. `audio/pcm;rate=24000`.
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// One piece of a content turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline media payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    /// Set when the text is model reasoning rather than a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    /// Part kinds this client does not interpret (executable code and the like).
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Part {
    /// A plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }

    /// An inline media part, base64-encoding `bytes`.
    pub fn inline(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            inline_data: Some(Blob {
                mime_type: mime_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
            ..Default::default()
        }
    }

    /// Whether this part carries audio.
    pub fn is_audio(&self) -> bool {
        self.inline_data.as_ref().is_some_and(|blob| blob.mime_type.starts_with("audio/"))
    }

    /// Whether this part is model reasoning.
    pub fn is_thought(&self) -> bool {
        self.thought.unwrap_or(false)
    }
}

/// A web or map source the agent cited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingReference {
    /// Source URI.
    pub uri: String,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Non-audio parts of one model turn message plus any grounding it carried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelContent {
    /// Text and other non-audio parts, in message order.
    pub parts: Vec<Part>,
    /// Grounding references attached to the message.
    pub grounding: Vec<GroundingReference>,
}

impl ModelContent {
    /// Concatenated reply text, skipping reasoning parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| !p.is_thought())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

// ── Tool calls ──────────────────────────────────────────────────────────

/// When a tool result should be delivered back to the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// Send as soon as this call resolves.
    #[default]
    Interrupt,
    /// Hold until every deferred call of the same batch has resolved.
    Deferred,
}

impl Scheduling {
    /// Parse a wire hint. Unknown or missing hints mean [`Scheduling::Interrupt`].
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.to_ascii_uppercase()) {
            Some(h) if h == "DEFERRED" || h == "WHEN_IDLE" || h == "SILENT" => Self::Deferred,
            _ => Self::Interrupt,
        }
    }
}

/// A function call requested by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call ID, echoed in the response.
    pub id: String,
    /// Tool/function name.
    pub name: String,
    /// Arguments as an untyped mapping.
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Delivery hint.
    #[serde(default)]
    pub scheduling: Scheduling,
}

/// The result of one call, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// The call ID being responded to.
    pub id: String,
    /// Tool/function name.
    pub name: String,
    /// Result object.
    pub response: Value,
}

impl FunctionResponse {
    /// Create a new function response.
    pub fn new(id: impl Into<String>, name: impl Into<String>, response: Value) -> Self {
        Self { id: id.into(), name: name.into(), response }
    }

    /// An error response describing why the call failed.
    pub fn error(id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, name, serde_json::json!({ "error": message.into() }))
    }

    /// Whether this response reports a failure.
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

/// A batch of function responses sent in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Responses, one per resolved call.
    pub function_responses: Vec<FunctionResponse>,
}

impl ToolResponse {
    /// Wrap a list of responses.
    pub fn new(function_responses: Vec<FunctionResponse>) -> Self {
        Self { function_responses }
    }

    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.function_responses.is_empty()
    }
}

// ── Session events ──────────────────────────────────────────────────────

/// Everything a [`crate::SessionClient`] reports to its listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection status moved.
    StatusChanged(SessionStatus),
    /// The transport opened and the setup frame was written.
    Open,
    /// The connection ended.
    Close {
        /// WebSocket close code (1000 for a normal local close).
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Transport or protocol failure.
    Error(String),
    /// The server acknowledged the setup frame.
    SetupComplete,
    /// One decoded audio part.
    Audio(AudioFrame),
    /// Non-audio parts and grounding of one message.
    Content(ModelContent),
    /// The agent requested one or more tool calls.
    ToolCall(Vec<ToolCallRequest>),
    /// The agent withdrew the listed call IDs.
    ToolCallCancellation(Vec<String>),
    /// The user barged in; pending agent output is stale.
    Interrupted,
    /// The agent finished its turn.
    TurnComplete,
    /// The agent finished generating (playback may still be in flight).
    GenerationComplete,
    /// Speech-to-text of the user's audio.
    InputTranscription {
        /// Delta text.
        text: String,
        /// Whether the segment is settled.
        is_final: bool,
    },
    /// Speech-to-text of the agent's audio.
    OutputTranscription {
        /// Delta text.
        text: String,
        /// Whether the segment is settled.
        is_final: bool,
    },
}

impl SessionEvent {
    /// Short event name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "status_changed",
            Self::Open => "open",
            Self::Close { .. } => "close",
            Self::Error(_) => "error",
            Self::SetupComplete => "setupcomplete",
            Self::Audio(_) => "audio",
            Self::Content(_) => "content",
            Self::ToolCall(_) => "toolcall",
            Self::ToolCallCancellation(_) => "toolcallcancellation",
            Self::Interrupted => "interrupted",
            Self::TurnComplete => "turncomplete",
            Self::GenerationComplete => "generationcomplete",
            Self::InputTranscription { .. } => "inputTranscription",
            Self::OutputTranscription { .. } => "outputTranscription",
        }
    }
}

// ── Listener bus ────────────────────────────────────────────────────────

/// Receives session events synchronously on the reader task.
///
/// Implementations must not block; long work belongs on a spawned task.
pub trait SessionListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Arc<dyn SessionListener>)>>,
}

/// Explicit subscribe/unsubscribe fan-out.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: Arc<dyn SessionListener>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Register a channel-backed listener for consumers that prefer to await
    /// events. The listener is removed when the subscription is dropped.
    pub fn subscribe_channel(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(move |event: &SessionEvent| {
            let _ = tx.send(event.clone());
        }));
        EventSubscription { id, rx, bus: Arc::downgrade(&self.inner) }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Deliver an event to every listener in registration order.
    ///
    /// The listener list is snapshotted first so listeners may subscribe or
    /// unsubscribe from inside a callback.
    pub fn emit(&self, event: &SessionEvent) {
        let snapshot: Vec<Arc<dyn SessionListener>> =
            self.inner.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("listeners", &self.listener_count()).finish()
    }
}

/// An awaitable stream of session events.
pub struct EventSubscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    bus: Weak<BusInner>,
}

impl EventSubscription {
    /// The underlying subscription ID.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.listeners.lock().retain(|(existing, _)| *existing != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_part_audio_detection() {
        assert!(Part::inline("audio/pcm;rate=24000", &[0, 1]).is_audio());
        assert!(!Part::inline("image/jpeg", &[0, 1]).is_audio());
        assert!(!Part::text("hello").is_audio());
    }

    #[test]
    fn test_part_keeps_unknown_fields() {
        let part: Part = serde_json::from_value(json!({
            "executableCode": { "language": "PYTHON", "code": "print(1)" }
        }))
        .unwrap();
        assert!(part.text.is_none());
        assert!(part.extra.contains_key("executableCode"));
        let back = serde_json::to_value(&part).unwrap();
        assert_eq!(back["executableCode"]["language"], "PYTHON");
    }

    #[test]
    fn test_model_content_text_skips_thoughts() {
        let content = ModelContent {
            parts: vec![
                Part { text: Some("thinking".into()), thought: Some(true), ..Default::default() },
                Part::text("Two stations "),
                Part::text("nearby."),
            ],
            grounding: vec![],
        };
        assert_eq!(content.text(), "Two stations nearby.");
    }

    #[test]
    fn test_scheduling_hint_parsing() {
        assert_eq!(Scheduling::from_hint(None), Scheduling::Interrupt);
        assert_eq!(Scheduling::from_hint(Some("INTERRUPT")), Scheduling::Interrupt);
        assert_eq!(Scheduling::from_hint(Some("deferred")), Scheduling::Deferred);
        assert_eq!(Scheduling::from_hint(Some("WHEN_IDLE")), Scheduling::Deferred);
        assert_eq!(Scheduling::from_hint(Some("bogus")), Scheduling::Interrupt);
    }

    #[test]
    fn test_function_response_error_shape() {
        let resp = FunctionResponse::error("call-1", "find_stations", "boom");
        assert!(resp.is_error());
        assert_eq!(resp.response, json!({ "error": "boom" }));
    }

    #[test]
    fn test_bus_delivers_in_registration_order_and_unsubscribes() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        let first = bus.subscribe(Arc::new(move |e: &SessionEvent| s1.lock().push(("a", e.kind()))));
        let s2 = Arc::clone(&seen);
        bus.subscribe(Arc::new(move |e: &SessionEvent| s2.lock().push(("b", e.kind()))));

        bus.emit(&SessionEvent::Open);
        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.emit(&SessionEvent::TurnComplete);

        assert_eq!(*seen.lock(), vec![("a", "open"), ("b", "open"), ("b", "turncomplete")]);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_emit() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let bus_clone = bus.clone();
        let calls_clone = Arc::clone(&calls);
        let slot_clone = Arc::clone(&id_slot);
        let id = bus.subscribe(Arc::new(move |_: &SessionEvent| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot_clone.lock() {
                bus_clone.unsubscribe(id);
            }
        }));
        *id_slot.lock() = Some(id);

        bus.emit(&SessionEvent::Open);
        bus.emit(&SessionEvent::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_subscription_receives_and_cleans_up() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_channel();
        bus.emit(&SessionEvent::SetupComplete);
        assert!(matches!(sub.recv().await, Some(SessionEvent::SetupComplete)));
        assert_eq!(bus.listener_count(), 1);
        drop(sub);
        assert_eq!(bus.listener_count(), 0);
    }
}
