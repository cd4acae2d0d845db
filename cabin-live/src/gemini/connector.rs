//! WebSocket transport for the Gemini Live API.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::LiveEndpoint;
use crate::error::{LiveError, Result};
use crate::transport::{Connection, Connector, FrameSink, InboundFrame};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;

/// Close code reported when the peer closed without sending one.
const NO_STATUS_CODE: u16 = 1005;

/// Opens WebSocket connections to a [`LiveEndpoint`].
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: LiveEndpoint,
}

impl GeminiLiveConnector {
    /// Create a connector for the given endpoint.
    pub fn new(endpoint: LiveEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Connector for GeminiLiveConnector {
    async fn open(&self) -> Result<Connection> {
        let url = self.endpoint.connection_url()?;
        let request = url.as_str().into_client_request().map_err(|e| {
            LiveError::connection(format!("Failed to create client request: {}", e))
        })?;

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| LiveError::connection(format!("WebSocket connect error: {}", e)))?;
        tracing::info!(url = %self.endpoint.url, "WebSocket connected");

        let (sink, source) = stream.split();
        let source = source.filter_map(|msg| async move { translate_inbound(msg) });

        Ok(Connection::new(Box::new(WsFrameSink { sink }), Box::pin(source)))
    }
}

struct WsFrameSink {
    sink: WsSink,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.sink.send(Message::Text(frame.into())).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.send(Message::Close(None)).await {
            Ok(()) => Ok(()),
            Err(e) => match map_ws_error(e) {
                LiveError::ConnectionClosed => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// Map one WebSocket message to an inbound frame. Control frames are dropped.
fn translate_inbound(
    msg: std::result::Result<Message, tungstenite::Error>,
) -> Option<Result<InboundFrame>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text.as_str().to_string()))),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(InboundFrame::Text(text))),
            Err(e) => {
                Some(Err(LiveError::protocol(format!("Invalid UTF-8 in binary message: {}", e))))
            }
        },
        Ok(Message::Close(frame)) => Some(Ok(match frame {
            Some(frame) => {
                InboundFrame::Close { code: frame.code.into(), reason: frame.reason.as_str().to_string() }
            }
            None => InboundFrame::Close { code: NO_STATUS_CODE, reason: String::new() },
        })),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(map_ws_error(e))),
    }
}

fn map_ws_error(e: tungstenite::Error) -> LiveError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            LiveError::ConnectionClosed
        }
        other => LiveError::connection(format!("WebSocket error: {}", other)),
    }
}
