//! Configuration types for live sessions.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{LiveError, Result};

/// Default Gemini Live model.
pub const DEFAULT_MODEL: &str = "models/gemini-live-2.5-flash-preview";

/// Gemini Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Tool/function declaration advertised to the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Configuration sent in the setup frame of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model resource name.
    pub model: String,

    /// System instruction for the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    /// Prebuilt voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response modalities, e.g. `["AUDIO"]` or `["TEXT"]`.
    pub response_modalities: Vec<String>,

    /// Temperature for response generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Ask the server to transcribe user speech.
    pub input_transcription: bool,

    /// Ask the server to transcribe agent speech.
    pub output_transcription: bool,

    /// Available tools/functions.
    pub tools: Vec<ToolDefinition>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            instruction: None,
            voice: None,
            response_modalities: vec!["AUDIO".to_string()],
            temperature: None,
            input_transcription: true,
            output_transcription: true,
            tools: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for SessionConfig.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Request text responses instead of audio.
    pub fn with_text_only(mut self) -> Self {
        self.response_modalities = vec!["TEXT".to_string()];
        self
    }

    /// Add a tool definition.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Set multiple tools.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Check the configuration before opening a connection.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LiveError::config("model must not be empty"));
        }
        if self.response_modalities.is_empty() {
            return Err(LiveError::config("at least one response modality is required"));
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(LiveError::config(format!("temperature {temp} outside 0.0..=2.0")));
            }
        }
        Ok(())
    }
}

/// Builder for SessionConfig.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    /// Toggle server-side transcription of both directions.
    pub fn transcription(mut self, enabled: bool) -> Self {
        self.config.input_transcription = enabled;
        self.config.output_transcription = enabled;
        self
    }

    /// Add a tool.
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.config.tools.push(tool);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = Some(temp);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Where and how to reach the hosted agent.
#[derive(Clone)]
pub struct LiveEndpoint {
    /// WebSocket URL of the bidirectional endpoint.
    pub url: String,
    api_key: SecretString,
}

impl LiveEndpoint {
    /// Public Gemini Live endpoint authenticated with an API key.
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self { url: GEMINI_LIVE_URL.to_string(), api_key: SecretString::from(api_key.into()) }
    }

    /// Override the endpoint URL (proxies, local test servers).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Resolve the final connection URL with the key attached as a query parameter.
    pub fn connection_url(&self) -> Result<url::Url> {
        let key = self.api_key.expose_secret();
        if key.is_empty() {
            return Err(LiveError::config("API key must not be empty"));
        }
        url::Url::parse_with_params(&self.url, &[("key", key)])
            .map_err(|e| LiveError::config(format!("Invalid endpoint URL '{}': {}", self.url, e)))
    }
}

impl std::fmt::Debug for LiveEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEndpoint").field("url", &self.url).field("api_key", &"***").finish()
    }
}

/// Exponential backoff for automatic reconnection after a remote close or
/// transport error. Local `disconnect()` never triggers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub initial_delay_ms: u64,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_delay_ms: u64,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { initial_delay_ms: 500, multiplier: 2.0, max_delay_ms: 15_000, max_attempts: 5 }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Client-side tuning that never goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Lead time before the first output chunk plays.
    pub playback_lead_ms: u64,
    /// Duration of each captured input frame.
    pub input_chunk_ms: u32,
    /// Capacity of the streaming log ring buffer.
    pub log_capacity: usize,
    /// Reconnection policy; `None` disables automatic reconnection.
    pub reconnect: Option<ReconnectPolicy>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self { playback_lead_ms: 100, input_chunk_ms: 100, log_capacity: 500, reconnect: None }
    }
}

impl ClientSettings {
    /// Playback lead time as a duration.
    pub fn playback_lead(&self) -> Duration {
        Duration::from_millis(self.playback_lead_ms)
    }
}
