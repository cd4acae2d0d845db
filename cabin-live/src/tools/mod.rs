//! Tool registry and dispatch.
//!
//! Tools are async handlers keyed by name. The [`ToolDispatcher`] listens for
//! tool-call events, runs each call on its own task with the host's
//! [`ToolContext`], and returns the results through a [`ToolResponder`].

mod context;
mod dispatcher;

pub use context::{
    DetachedFailure, DetachedTasks, Geocoder, LatLng, MapMarker, MapPadding, MapSurface,
    ToolContext, UiHooks,
};
pub use dispatcher::ToolDispatcher;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::config::ToolDefinition;
use crate::error::Result;
use crate::events::ToolResponse;

/// The value a tool hands back to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// Plain text, sent as `{"result": text}`.
    Text(String),
    /// A structured object, sent as-is.
    Structured(Map<String, Value>),
}

/// What a handler returns: the agent-facing result plus optional display data.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub result: ToolResult,
    /// One-line summary shown in the transcript.
    pub summary: Option<String>,
    /// Payload for a UI card rendering the result.
    pub render: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { result: ToolResult::Text(text.into()), summary: None, render: None }
    }

    /// A structured result. Non-object values are wrapped as `{"result": value}`.
    pub fn structured(value: Value) -> Self {
        let map = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self { result: ToolResult::Structured(map), summary: None, render: None }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_render(mut self, payload: Value) -> Self {
        self.render = Some(payload);
        self
    }

    /// The `response` object of the function response frame.
    pub fn response_value(&self) -> Value {
        match &self.result {
            ToolResult::Text(text) => json!({ "result": text }),
            ToolResult::Structured(map) => Value::Object(map.clone()),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

/// Trait for handling tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the agent-supplied arguments.
    async fn invoke(&self, args: Map<String, Value>, ctx: Arc<ToolContext>) -> Result<ToolOutput>;
}

/// Closure-based tool handler.
pub struct FnToolHandler<F, Fut>
where
    F: Fn(Map<String, Value>, Arc<ToolContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput>> + Send,
{
    handler: F,
}

impl<F, Fut> FnToolHandler<F, Fut>
where
    F: Fn(Map<String, Value>, Arc<ToolContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput>> + Send,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F, Fut>
where
    F: Fn(Map<String, Value>, Arc<ToolContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput>> + Send,
{
    async fn invoke(&self, args: Map<String, Value>, ctx: Arc<ToolContext>) -> Result<ToolOutput> {
        (self.handler)(args, ctx).await
    }
}

/// Where tool results are sent. Implemented by the session client.
#[async_trait]
pub trait ToolResponder: Send + Sync {
    /// Write a tool-response frame. Returns whether it was sent.
    async fn send_tool_response(&self, response: ToolResponse) -> bool;
}

#[derive(Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Tools keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any tool of the same name.
    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        let name = definition.name.clone();
        if self.tools.insert(name.clone(), RegisteredTool { definition, handler }).is_some() {
            tracing::warn!(tool.name = %name, "Replacing registered tool");
        }
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(Map<String, Value>, Arc<ToolContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        self.register(definition, Arc::new(FnToolHandler::new(handler)));
    }

    /// Builder-style [`register_fn`](Self::register_fn).
    pub fn with_fn<F, Fut>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Map<String, Value>, Arc<ToolContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        self.register_fn(definition, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|tool| tool.handler.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declarations for the setup frame, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}
