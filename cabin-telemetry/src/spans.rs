//! Span helpers for live session operations

use tracing::Span;

/// Create a span covering one connection of a session
///
/// # Arguments
/// * `model` - Model resource name the session talks to
/// * `session_id` - Unique ID for this connection
///
/// # Example
/// ```
/// use cabin_telemetry::session_span;
/// let span = session_span("models/gemini-live-2.5-flash-preview", "sess-123");
/// let _enter = span.enter();
/// ```
pub fn session_span(model: &str, session_id: &str) -> Span {
    tracing::info_span!("live.session", model.name = model, session.id = session_id)
}

/// Create a span for one tool call
///
/// # Example
/// ```
/// use cabin_telemetry::tool_execute_span;
/// let span = tool_execute_span("find_stations", "call-1");
/// let _enter = span.enter();
/// ```
pub fn tool_execute_span(tool_name: &str, call_id: &str) -> Span {
    tracing::info_span!("tool.execute", tool.name = tool_name, call.id = call_id)
}

/// Create a span for handling one frame
///
/// # Arguments
/// * `direction` - `"send"` or `"receive"`
/// * `kind` - Message kind, e.g. `"realtimeInput"`
pub fn frame_span(direction: &str, kind: &str) -> Span {
    tracing::debug_span!("live.frame", frame.direction = direction, frame.kind = kind)
}
