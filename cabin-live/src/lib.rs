//! # cabin-live
//!
//! Real-time multimodal agent sessions over the Gemini Live API.
//!
//! The crate keeps one duplex stream open to a conversational agent, streams
//! microphone audio up and agent audio down, turns transcription fragments
//! into conversational turns, and runs the agent's tool calls locally.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐   frames    ┌───────────────┐
//!  Connector │ SessionClient│────────────▶│   EventBus    │
//!  ─────────▶│  (reader)    │             └──────┬────────┘
//!            └──────▲───────┘                    │ SessionEvent
//!                   │ send            ┌──────────┼──────────────┬───────────────┐
//!                   │                 ▼          ▼              ▼               ▼
//!                   │        TranscriptAssembler ToolDispatcher AudioOutput     CaptureGate
//!                   │                            │              Pipeline        │
//!                   └────────────────────────────┴──────────────────────────────┘
//!                            tool responses, microphone chunks
//! ```
//!
//! Inbound frames are processed in arrival order on a single reader task and
//! delivered synchronously to listeners. Tool handlers and audio I/O run on
//! their own tasks so the reader never waits on them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cabin_live::gemini::GeminiLiveConnector;
//! use cabin_live::{LiveEndpoint, LiveSession, SessionConfig, ToolRegistry};
//! use std::sync::Arc;
//!
//! let connector = Arc::new(GeminiLiveConnector::new(LiveEndpoint::gemini(api_key)));
//! let session = LiveSession::builder(connector)
//!     .config(SessionConfig::default().with_instruction("You are a helpful co-pilot."))
//!     .tools(ToolRegistry::new())
//!     .build()?;
//!
//! if session.connect().await {
//!     session.send_text("Find a charger near me").await;
//! }
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod gemini;
pub mod log;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod transport;

// Re-exports
pub use audio::{AudioFrame, AudioInputPipeline, AudioOutputPipeline, CaptureDevice, PlaybackSink};
pub use client::{SessionClient, SessionClientBuilder, SessionStatus};
pub use config::{
    ClientSettings, LiveEndpoint, ReconnectPolicy, SessionConfig, SessionConfigBuilder, ToolDefinition,
};
pub use error::{AudioError, LiveError, Result};
pub use events::{
    EventBus, FunctionResponse, Part, Scheduling, SessionEvent, SessionListener, ToolCallRequest,
    ToolResponse,
};
pub use log::{LogCategory, StreamingLog, StreamingLogEntry};
pub use session::{LiveSession, LiveSessionBuilder};
pub use tools::{ToolContext, ToolDispatcher, ToolHandler, ToolOutput, ToolRegistry};
pub use transcript::{ConversationTurn, Role, Transcript, TranscriptAssembler};
pub use transport::{Connection, Connector};
