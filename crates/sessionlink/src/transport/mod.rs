//! Realtime transport.
//!
//! The binder only cares about connection lifecycle: a [`Transport`] opens a
//! [`Connection`] that reports `Connected` (with a fresh connection id) and
//! `Disconnected` events, reconnecting on its own. Application events are
//! passed through untouched.

mod backoff;
mod socketio;

use serde_json::Value;
use sessionlink_protocol::PacketError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use backoff::ReconnectPolicy;
pub use socketio::SocketIoTransport;

/// Size of the per-connection event buffer.
pub const EVENT_BUFFER_SIZE: usize = 64;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("server rejected namespace connect: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] PacketError),

    #[error("connection is closed")]
    Closed,
}

/// Lifecycle and application events reported by a [`Connection`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A (re)connection succeeded; every connect carries a new id.
    Connected { connection_id: String },
    /// The live connection was lost. The transport keeps reconnecting.
    Disconnected { reason: String },
    /// Any other event pushed by the server.
    Message { event: String, args: Vec<Value> },
}

/// An event queued for the server.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub event: String,
    pub args: Vec<Value>,
}

/// Clonable handle for sending events over a connection.
///
/// Events emitted while the connection is between reconnects are buffered
/// and flushed once it is back.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Emitter {
    /// Create an emitter and the receiving end a transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: impl Into<String>, args: Vec<Value>) -> TransportResult<()> {
        self.tx
            .send(OutboundMessage {
                event: event.into(),
                args,
            })
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live transport connection. Closing it (or dropping it) stops the
/// transport and its reconnect loop.
#[derive(Debug)]
pub struct Connection {
    events: mpsc::Receiver<TransportEvent>,
    emitter: Emitter,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        events: mpsc::Receiver<TransportEvent>,
        emitter: Emitter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            events,
            emitter,
            shutdown,
        }
    }

    /// Next event, or `None` once the transport has stopped.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Token cancelled when this connection is closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Factory for realtime connections.
pub trait Transport: Send + Sync {
    /// Start connecting and return immediately; progress is reported through
    /// the connection's events. Must be called from within a tokio runtime.
    fn open(&self) -> Connection;
}
