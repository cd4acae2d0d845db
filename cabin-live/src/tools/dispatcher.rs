//! Runs agent tool calls and returns their results.

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::Instrument;

use super::context::panic_message;
use super::{ToolContext, ToolOutput, ToolRegistry, ToolResponder};
use crate::events::{
    FunctionResponse, Scheduling, SessionEvent, SessionListener, ToolCallRequest, ToolResponse,
};
use crate::log::{LogCategory, StreamingLog};
use crate::transcript::{ConversationTurn, Transcript};

/// Deferred calls of one tool-call event, sent together once all resolve.
#[derive(Default)]
struct Batch {
    pending: HashSet<String>,
    members: Vec<String>,
    results: Vec<FunctionResponse>,
}

struct Outstanding {
    name: String,
    abort: AbortHandle,
    batch: Option<Arc<Mutex<Batch>>>,
}

struct DispatcherInner {
    registry: ToolRegistry,
    context: Arc<ToolContext>,
    responder: Arc<dyn ToolResponder>,
    transcript: Transcript,
    log: StreamingLog,
    outstanding: Mutex<HashMap<String, Outstanding>>,
    awaiting: watch::Sender<bool>,
    drain_started: AtomicBool,
}

/// Session listener that executes tool calls.
///
/// Each call runs on its own task. Interrupt-scheduled results are sent as
/// soon as they resolve; deferred results of one event are held until the
/// whole set has resolved. Errors and panics become error responses, so the
/// agent always hears back about every call that was not cancelled.
#[derive(Clone)]
pub struct ToolDispatcher {
    inner: Arc<DispatcherInner>,
}

impl ToolDispatcher {
    pub fn new(
        registry: ToolRegistry,
        context: Arc<ToolContext>,
        responder: Arc<dyn ToolResponder>,
        transcript: Transcript,
        log: StreamingLog,
    ) -> Self {
        let (awaiting, _) = watch::channel(false);
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                context,
                responder,
                transcript,
                log,
                outstanding: Mutex::new(HashMap::new()),
                awaiting,
                drain_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// Watch the "awaiting tool response" flag.
    pub fn awaiting(&self) -> watch::Receiver<bool> {
        self.inner.awaiting.subscribe()
    }

    pub fn is_awaiting(&self) -> bool {
        *self.inner.awaiting.borrow()
    }

    /// Number of calls whose response has not been sent yet.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.lock().len()
    }

    /// Start executing `calls`. Must be called inside a tokio runtime.
    pub fn dispatch(&self, calls: Vec<ToolCallRequest>) {
        if calls.is_empty() {
            return;
        }
        self.start_failure_drain();

        let deferred: Vec<String> = calls
            .iter()
            .filter(|c| c.scheduling == Scheduling::Deferred)
            .map(|c| c.id.clone())
            .collect();
        let batch = (!deferred.is_empty()).then(|| {
            Arc::new(Mutex::new(Batch {
                pending: deferred.iter().cloned().collect(),
                members: deferred,
                results: Vec::new(),
            }))
        });

        for call in &calls {
            tracing::info!(
                tool.name = %call.name,
                call.id = %call.id,
                scheduling = ?call.scheduling,
                "Dispatching tool call"
            );
            self.inner.log.push(
                LogCategory::Tool,
                json!({ "event": "call", "id": call.id, "name": call.name, "args": call.args }),
            );
            let mut turn = ConversationTurn::system(format!("Calling {}", call.name));
            turn.tool_use_request = Some(call.clone());
            self.inner.transcript.push(turn);
        }

        let mut outstanding = self.inner.outstanding.lock();
        self.inner.awaiting.send_replace(true);
        for call in calls {
            let batch = match call.scheduling {
                Scheduling::Deferred => batch.clone(),
                Scheduling::Interrupt => None,
            };
            let span = cabin_telemetry::tool_execute_span(&call.name, &call.id);
            let id = call.id.clone();
            let name = call.name.clone();
            let task = tokio::spawn(run_call(self.inner.clone(), call).instrument(span));
            if let Some(previous) =
                outstanding.insert(id.clone(), Outstanding { name, abort: task.abort_handle(), batch })
            {
                tracing::warn!(call.id = %id, "Duplicate tool call id, aborting the earlier call");
                previous.abort.abort();
            }
        }
    }

    /// Abort the named calls. Their results are never sent.
    pub fn cancel(&self, ids: &[String]) {
        let mut cancelled = Vec::new();
        let mut flushes = Vec::new();
        {
            let mut outstanding = self.inner.outstanding.lock();
            for id in ids {
                let Some(entry) = outstanding.remove(id) else {
                    tracing::debug!(call.id = %id, "Cancellation for unknown or finished call");
                    continue;
                };
                entry.abort.abort();
                cancelled.push((id.clone(), entry.name));

                if let Some(batch) = entry.batch {
                    let mut batch = batch.lock();
                    batch.pending.remove(id);
                    batch.members.retain(|m| m != id);
                    batch.results.retain(|r| &r.id != id);
                    if batch.pending.is_empty() && !batch.results.is_empty() {
                        for member in &batch.members {
                            outstanding.remove(member);
                        }
                        flushes.push(std::mem::take(&mut batch.results));
                    }
                }
            }
            if flushes.is_empty() {
                self.inner.awaiting.send_replace(!outstanding.is_empty());
            }
        }

        for (id, name) in cancelled {
            tracing::info!(tool.name = %name, call.id = %id, "Tool call cancelled");
            self.inner.log.push(LogCategory::Tool, json!({ "event": "cancel", "id": id, "name": name }));
            self.inner.transcript.push_system(format!("Cancelled {name}"));
        }
        for responses in flushes {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.flush(responses).await });
        }
    }

    /// Abort everything in flight, including detached follow-ups.
    pub fn cancel_all(&self) {
        let drained: Vec<(String, Outstanding)> = {
            let mut outstanding = self.inner.outstanding.lock();
            let drained = outstanding.drain().collect();
            self.inner.awaiting.send_replace(false);
            drained
        };
        for (_, entry) in &drained {
            entry.abort.abort();
        }
        self.inner.context.tasks().cancel_all();

        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Aborted outstanding tool calls");
            self.inner.log.push(
                LogCategory::Tool,
                json!({ "event": "abort", "ids": drained.iter().map(|(id, _)| id).collect::<Vec<_>>() }),
            );
        }
    }

    fn start_failure_drain(&self) {
        if self.inner.drain_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut failures) = self.inner.context.tasks().take_failures() else {
            return;
        };
        let log = self.inner.log.clone();
        let transcript = self.inner.transcript.clone();
        tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                log.push(
                    LogCategory::Diagnostic,
                    json!({ "task": failure.label, "error": failure.error }),
                );
                transcript.push_system(format!("{} failed: {}", failure.label, failure.error));
            }
        });
    }
}

async fn run_call(inner: Arc<DispatcherInner>, call: ToolCallRequest) {
    let ToolCallRequest { id, name, args, .. } = call;

    let (response, output) = match inner.registry.get(&name) {
        None => {
            tracing::warn!(tool.name = %name, "Unknown tool");
            (FunctionResponse::error(&id, &name, format!("Unknown tool: {name}")), None)
        }
        Some(handler) => {
            let outcome = AssertUnwindSafe(handler.invoke(args, inner.context.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(output)) => {
                    tracing::debug!(tool.name = %name, "Tool call succeeded");
                    (FunctionResponse::new(&id, &name, output.response_value()), Some(output))
                }
                Ok(Err(e)) => {
                    tracing::warn!(tool.name = %name, error = %e, "Tool call failed");
                    (FunctionResponse::error(&id, &name, e.to_string()), None)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(tool.name = %name, panic = %message, "Tool handler panicked");
                    (FunctionResponse::error(&id, &name, format!("Tool panicked: {message}")), None)
                }
            }
        }
    };

    inner.settle(response, output).await;
}

impl DispatcherInner {
    async fn settle(&self, response: FunctionResponse, output: Option<ToolOutput>) {
        let ready = {
            let mut outstanding = self.outstanding.lock();
            let Some(entry) = outstanding.get(&response.id) else {
                tracing::debug!(call.id = %response.id, "Discarding late tool result");
                return;
            };
            match entry.batch.clone() {
                None => {
                    outstanding.remove(&response.id);
                    Some(vec![response.clone()])
                }
                Some(batch) => {
                    let mut batch = batch.lock();
                    batch.pending.remove(&response.id);
                    batch.results.push(response.clone());
                    if batch.pending.is_empty() {
                        for member in &batch.members {
                            outstanding.remove(member);
                        }
                        Some(std::mem::take(&mut batch.results))
                    } else {
                        None
                    }
                }
            }
        };

        self.record_result(&response, output);
        if let Some(responses) = ready {
            self.flush(responses).await;
        }
    }

    fn record_result(&self, response: &FunctionResponse, output: Option<ToolOutput>) {
        self.log.push(
            LogCategory::Tool,
            json!({ "event": "result", "id": response.id, "name": response.name, "response": response.response }),
        );

        let (text, render) = match output {
            Some(output) => {
                let text = output.summary.unwrap_or_else(|| format!("{} finished", response.name));
                (text, output.render)
            }
            None => {
                let reason = response.response.get("error").and_then(Value::as_str).unwrap_or("failed");
                (format!("{} failed: {reason}", response.name), None)
            }
        };
        let mut turn = ConversationTurn::system(text);
        turn.tool_use_response = Some(response.clone());
        turn.tool_render_payload = render;
        self.transcript.push(turn);
    }

    async fn flush(&self, responses: Vec<FunctionResponse>) {
        let count = responses.len();
        if !self.responder.send_tool_response(ToolResponse::new(responses)).await {
            tracing::warn!(count, "Tool response not sent");
        }
        let outstanding = self.outstanding.lock();
        self.awaiting.send_replace(!outstanding.is_empty());
    }
}

impl SessionListener for ToolDispatcher {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::ToolCall(calls) => self.dispatch(calls.clone()),
            SessionEvent::ToolCallCancellation(ids) => self.cancel(ids),
            SessionEvent::Close { .. } => self.cancel_all(),
            _ => {}
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("registry", &self.inner.registry)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
