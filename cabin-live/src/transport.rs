//! Transport seam between the session client and the wire.
//!
//! A [`Connector`] opens a duplex connection and hands back a frame sink and
//! a frame source. The WebSocket implementation lives in
//! [`crate::gemini::GeminiLiveConnector`]; tests plug in in-memory connectors.

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

use crate::error::Result;

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A JSON text frame (binary frames are decoded to UTF-8 by the transport).
    Text(String),
    /// The remote side closed the connection.
    Close {
        /// Close code; 1005 when the peer sent none.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Send a normal close and release the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Boxed outbound half.
pub type BoxedFrameSink = Box<dyn FrameSink>;

/// Boxed inbound half. The stream ends when the transport is gone.
pub type BoxedFrameSource = Pin<Box<dyn Stream<Item = Result<InboundFrame>> + Send>>;

/// An open connection, split into halves.
pub struct Connection {
    /// Outbound half.
    pub sink: BoxedFrameSink,
    /// Inbound half.
    pub source: BoxedFrameSource,
}

impl Connection {
    /// Bundle two halves.
    pub fn new(sink: BoxedFrameSink, source: BoxedFrameSource) -> Self {
        Self { sink, source }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to the hosted agent.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new duplex connection.
    async fn open(&self) -> Result<Connection>;
}
