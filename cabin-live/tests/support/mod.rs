//! In-memory connector for session tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cabin_live::error::{LiveError, Result};
use cabin_live::transport::{Connection, Connector, FrameSink, InboundFrame};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Server side of one in-memory connection.
pub struct MockServer {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Result<InboundFrame>>,
}

impl MockServer {
    /// Next frame the client wrote, parsed.
    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.sent.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client sink dropped");
        serde_json::from_str(&frame).expect("client frame is JSON")
    }

    /// Whether nothing else was written within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.sent.recv()).await.is_err()
    }

    pub fn push(&self, message: Value) {
        let _ = self.inbound.send(Ok(InboundFrame::Text(message.to_string())));
    }

    pub fn push_raw(&self, raw: &str) {
        let _ = self.inbound.send(Ok(InboundFrame::Text(raw.to_string())));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(Ok(InboundFrame::Close { code, reason: reason.to_string() }));
    }

    pub fn fail(&self, error: LiveError) {
        let _ = self.inbound.send(Err(error));
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<String>,
    close_delay: Duration,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.tx.send(frame).map_err(|_| LiveError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        Ok(())
    }
}

/// Hands each accepted connection's server half to the test.
pub struct MockConnector {
    servers: mpsc::UnboundedSender<MockServer>,
    refuse: AtomicBool,
    opens: AtomicUsize,
    delay: Duration,
    close_delay: Duration,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        Self::with_delay(Duration::ZERO)
    }

    /// A connector whose `open` takes `delay`.
    pub fn with_delay(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        Self::with_delays(delay, Duration::ZERO)
    }

    /// A connector whose sinks take `close_delay` to close.
    pub fn with_close_delay(close_delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        Self::with_delays(Duration::ZERO, close_delay)
    }

    fn with_delays(delay: Duration, close_delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            refuse: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            delay,
            close_delay,
        });
        (connector, rx)
    }

    /// Make subsequent opens fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> Result<Connection> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LiveError::connection("connection refused"));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let _ = self.servers.send(MockServer { sent: sent_rx, inbound: inbound_tx });

        let source = futures::stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        Ok(Connection::new(Box::new(MockSink { tx: sent_tx, close_delay: self.close_delay }), Box::pin(source)))
    }
}

/// Wait for the next server half.
pub async fn accept(servers: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    tokio::time::timeout(Duration::from_secs(2), servers.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}
