//! Error types for the live session engine.

use thiserror::Error;

/// Result type for live session operations.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Errors that can occur while running a live session.
#[derive(Error, Debug)]
pub enum LiveError {
    /// Transport-level connection failure.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The socket is closing or already closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed or unexpected frame.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Session not connected.
    #[error("Session not connected")]
    NotConnected,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Audio device or format error.
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Tool execution error.
    #[error("Tool execution error: {0}")]
    ToolError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LiveError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new audio stream error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::Audio(AudioError::Stream(msg.into()))
    }

    /// Create a new tool error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolError(msg.into())
    }

    /// Whether this error belongs to the "socket is closing" class that is
    /// expected during teardown and reconnect races.
    pub fn is_benign_close(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::NotConnected)
    }
}

/// Microphone and speaker errors.
///
/// These never tear down a session: the input pipeline halts and the host
/// surfaces the message as a diagnostic turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// The user or the OS refused microphone access.
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable device was found.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device was found but the stream could not be built or started.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// Sample data did not match the expected format.
    #[error("Audio format error: {0}")]
    Format(String),
}

impl AudioError {
    /// Create a new stream error.
    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a new format error.
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_close_classification() {
        assert!(LiveError::ConnectionClosed.is_benign_close());
        assert!(LiveError::NotConnected.is_benign_close());
        assert!(!LiveError::connection("reset by peer").is_benign_close());
        assert!(!LiveError::protocol("bad frame").is_benign_close());
    }

    #[test]
    fn test_audio_error_converts_transparently() {
        let err: LiveError = AudioError::PermissionDenied("blocked by OS".into()).into();
        assert_eq!(err.to_string(), "Microphone permission denied: blocked by OS");
    }

    #[test]
    fn test_audio_helper_wraps_stream_error() {
        let err = LiveError::audio("output device vanished");
        assert!(matches!(err, LiveError::Audio(AudioError::Stream(ref msg)) if msg == "output device vanished"));
        assert_eq!(err.to_string(), "Audio stream error: output device vanished");
    }
}
