//! Message-oriented transport to the observer.
//!
//! A [`Connection`] is split into a sending half and a one-shot close
//! notification so the supervisor can wait for a close while it keeps
//! sending.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::errors::TransportError;

/// RFC 6455 normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// RFC 6455 "abnormal closure": the peer vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
        }
    }

    /// Only a normal closure suppresses reconnection.
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// Sending half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close with the given code; best effort.
    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

/// An open connection.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    /// Resolves when the peer closes or the connection drops. A dropped
    /// sender means the connection vanished.
    pub closed: oneshot::Receiver<CloseReason>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to the observer for a research.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, research_id: &str) -> Result<Connection, TransportError>;
}

// ── WebSocket transport ──────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client transport.
///
/// The research id is appended as a `researchId` query parameter so the
/// observer can route the connection. A handshake that does not finish
/// within the connect timeout fails like a refused connection.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn url_for(&self, research_id: &str) -> Result<String, TransportError> {
        let mut url = Url::parse(&self.url).map_err(|e| {
            TransportError::Connect(format!("invalid observer url '{}': {e}", self.url))
        })?;
        url.query_pairs_mut().append_pair("researchId", research_id);
        Ok(url.into())
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(reason.code),
            reason: reason.reason.into(),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, research_id: &str) -> Result<Connection, TransportError> {
        let url = self.url_for(research_id)?;
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, mut inbound) = stream.split();
        let (closed_tx, closed_rx) = oneshot::channel();

        // The observer does not talk back; drain frames only to notice the close.
        tokio::spawn(async move {
            let reason = loop {
                match inbound.next().await {
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => CloseReason {
                                code: u16::from(frame.code),
                                reason: frame.reason.to_string(),
                            },
                            None => CloseReason::normal(""),
                        };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break CloseReason::abnormal(e.to_string()),
                    None => break CloseReason::abnormal("stream ended"),
                }
            };
            debug!(code = reason.code, reason = %reason.reason, "observer connection closed");
            let _ = closed_tx.send(reason);
        });

        Ok(Connection {
            sink: Box::new(WsSink { inner: sink }),
            closed: closed_rx,
        })
    }
}
