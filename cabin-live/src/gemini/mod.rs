//! Gemini Live API wire format and WebSocket transport.
//!
//! ```rust,ignore
//! use cabin_live::gemini::GeminiLiveConnector;
//! use cabin_live::LiveEndpoint;
//!
//! let connector = GeminiLiveConnector::new(LiveEndpoint::gemini(api_key));
//! ```

mod connector;
pub mod protocol;

pub use connector::GeminiLiveConnector;
pub use protocol::{ClientMessage, INPUT_AUDIO_MIME, MediaChunk, ServerContent, ServerMessage, Transcription};
