use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::logging::{self, obj, v_num, v_str, Domain};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>>;
}

/// One open duplex connection carrying text frames.
#[async_trait]
pub trait Connection: Send {
    /// Next inbound text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String>>;
    async fn send(&mut self, text: String) -> Result<()>;
    async fn close(&mut self);
}

// =============================================================================
// WebSocket transport
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>> {
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Box::new(WsConnection { ws }))
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    // A bad frame is dropped; the socket stays up.
                    Err(e) => {
                        logging::warn(
                            Domain::Transport,
                            "drop_binary_frame",
                            obj(&[("bytes", v_num(e.as_bytes().len() as f64)), ("error", v_str(&e.to_string()))]),
                        );
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite on the next read/write.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

// =============================================================================
// In-memory transport
// =============================================================================

/// Transport backed by queued in-process peers. Each `connect` consumes the
/// next queued peer; with none queued the attempt is refused.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    queued: VecDeque<MemoryConnection>,
    attempts: Vec<Url>,
}

/// Server side of a queued in-memory connection. Dropping it closes the
/// connection from the server end.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Result<String, String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Result<String, String>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_connection(&self) -> MemoryPeer {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.queued.push_back(MemoryConnection {
                inbound: in_rx,
                outbound: out_tx,
            });
        }
        MemoryPeer {
            inbound: in_tx,
            outbound: out_rx,
        }
    }

    /// Every URL a connect was attempted against, refused ones included.
    pub fn attempts(&self) -> Vec<Url> {
        self.inner
            .lock()
            .map(|inner| inner.attempts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory transport poisoned"))?;
        inner.attempts.push(url.clone());
        match inner.queued.pop_front() {
            Some(conn) => Ok(Box::new(conn)),
            None => Err(anyhow!("connection refused: {}", url)),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn recv(&mut self) -> Option<Result<String>> {
        match self.inbound.recv().await? {
            Ok(text) => Some(Ok(text)),
            Err(e) => Some(Err(anyhow!(e))),
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| anyhow!("peer is gone"))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

impl MemoryPeer {
    /// Push a text frame to the client. Returns false once the client side is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Ok(text.into())).is_ok()
    }

    /// Push a transport error to the client.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.inbound.send(Err(error.into())).is_ok()
    }

    /// Frames the client has written so far.
    pub fn sent(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            out.push(text);
        }
        out
    }
}
