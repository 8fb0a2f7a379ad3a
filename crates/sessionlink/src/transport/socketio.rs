//! Socket.IO over a raw websocket, with automatic reconnection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use sessionlink_protocol::{DEFAULT_NAMESPACE, EnginePacket, SocketPacket};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectPolicy;
use super::{
    Connection, EVENT_BUFFER_SIZE, Emitter, OutboundMessage, Transport, TransportError,
    TransportEvent, TransportResult,
};
use crate::config::ClientConfig;

/// Upper bound on how long a silent connection is considered alive.
const MAX_LIVENESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Websocket Socket.IO transport.
#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    /// Full websocket URL, including the Engine.IO query.
    url: String,
    namespace: String,
    reconnect: ReconnectPolicy,
    connect_timeout: Duration,
}

/// How a single websocket session ended.
enum StreamEnd {
    /// Closed from our side; stop reconnecting.
    Closed,
    Dropped { reason: String, connected: bool },
}

impl SocketIoTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.websocket_url(),
            namespace: config.transport.namespace.clone(),
            reconnect: ReconnectPolicy::from_config(&config.transport),
            connect_timeout: config.transport.connect_timeout(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect, stream, and reconnect until shut down or out of attempts.
    async fn run(
        self,
        events: mpsc::Sender<TransportEvent>,
        mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        shutdown: CancellationToken,
    ) {
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                if self.reconnect.exhausted(attempt) {
                    warn!(
                        "Giving up on {} after {} reconnect attempts",
                        self.url,
                        attempt - 1
                    );
                    break;
                }
                let delay = self.reconnect.delay(attempt);
                debug!(
                    "Reconnecting to {} in {:?} (attempt {})",
                    self.url, delay, attempt
                );
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.cancelled() => break,
                }
            }

            match self.connect_and_stream(&events, &mut outbound, &shutdown).await {
                Ok(StreamEnd::Closed) => break,
                Ok(StreamEnd::Dropped { reason, connected }) => {
                    info!("Realtime connection to {} lost: {}", self.url, reason);
                    if connected {
                        attempt = 1;
                        if events
                            .send(TransportEvent::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    } else {
                        attempt += 1;
                    }
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        "Realtime connection to {} failed (attempt {}): {}",
                        self.url, attempt, e
                    );
                }
            }

            if shutdown.is_cancelled() {
                break;
            }
        }

        debug!("Transport loop for {} stopped", self.url);
    }

    async fn connect_and_stream(
        &self,
        events: &mpsc::Sender<TransportEvent>,
        outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
        shutdown: &CancellationToken,
    ) -> TransportResult<StreamEnd> {
        debug!("Connecting to {}", self.url);

        let connect = tokio::select! {
            result = timeout(self.connect_timeout, connect_async(self.url.as_str())) => result,
            _ = shutdown.cancelled() => return Ok(StreamEnd::Closed),
        };
        let (socket, _) = connect.map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        let mut connected = false;
        let result = self
            .stream(socket, events, outbound, shutdown, &mut connected)
            .await;
        match result {
            // Once connected, every failure is a disconnect of that session.
            Err(e) if connected => Ok(StreamEnd::Dropped {
                reason: e.to_string(),
                connected,
            }),
            other => other,
        }
    }

    async fn stream(
        &self,
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
        events: &mpsc::Sender<TransportEvent>,
        outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
        shutdown: &CancellationToken,
        connected: &mut bool,
    ) -> TransportResult<StreamEnd> {
        let (mut sink, mut stream) = socket.split();

        // Until the open packet arrives the connect timeout bounds the
        // handshake; afterwards the server's ping schedule does.
        let mut liveness = self.connect_timeout.min(MAX_LIVENESS);
        let mut deadline = deadline_after(liveness);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if *connected {
                        let leave = SocketPacket::Disconnect { namespace: self.namespace.clone() };
                        let _ = sink.send(text(EnginePacket::Message(leave.encode()))).await;
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(StreamEnd::Closed);
                }
                _ = sleep_until(deadline) => {
                    return Ok(StreamEnd::Dropped {
                        reason: "ping timeout".to_string(),
                        connected: *connected,
                    });
                }
                Some(out) = outbound.recv(), if *connected => {
                    let packet = SocketPacket::event(self.namespace.clone(), out.event, out.args);
                    sink.send(text(EnginePacket::Message(packet.encode()))).await?;
                }
                frame = stream.next() => {
                    let frame = match frame {
                        None => {
                            return Ok(StreamEnd::Dropped {
                                reason: "transport close".to_string(),
                                connected: *connected,
                            });
                        }
                        Some(Err(e)) => {
                            return Ok(StreamEnd::Dropped {
                                reason: format!("transport error: {e}"),
                                connected: *connected,
                            });
                        }
                        Some(Ok(frame)) => frame,
                    };
                    deadline = deadline_after(liveness);

                    let body = match frame {
                        Message::Text(body) => body,
                        Message::Close(_) => {
                            return Ok(StreamEnd::Dropped {
                                reason: "transport close".to_string(),
                                connected: *connected,
                            });
                        }
                        _ => continue,
                    };

                    let packet = match EnginePacket::decode(body.as_str()) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!("Ignoring malformed frame from {}: {}", self.url, e);
                            continue;
                        }
                    };

                    match packet {
                        EnginePacket::Open(open) => {
                            debug!("Engine.IO session {} opened", open.sid);
                            let window = open.ping_interval.saturating_add(open.ping_timeout);
                            liveness = Duration::from_millis(window).min(MAX_LIVENESS);
                            deadline = deadline_after(liveness);
                            let join = SocketPacket::connect(self.namespace.clone());
                            sink.send(text(EnginePacket::Message(join.encode()))).await?;
                        }
                        EnginePacket::Ping(data) => {
                            sink.send(text(EnginePacket::Pong(data))).await?;
                        }
                        EnginePacket::Close => {
                            return Ok(StreamEnd::Dropped {
                                reason: "server close".to_string(),
                                connected: *connected,
                            });
                        }
                        EnginePacket::Message(body) => {
                            let packet = match SocketPacket::decode(&body) {
                                Ok(packet) => packet,
                                Err(e) => {
                                    warn!("Ignoring malformed packet from {}: {}", self.url, e);
                                    continue;
                                }
                            };
                            if packet.namespace() != self.namespace {
                                continue;
                            }
                            match packet {
                                SocketPacket::Connect { .. } => {
                                    let Some(sid) = packet.sid() else {
                                        return Err(TransportError::Rejected(
                                            "connect acknowledgement without sid".to_string(),
                                        ));
                                    };
                                    *connected = true;
                                    info!("Connected to {} as {}", self.url, sid);
                                    let event = TransportEvent::Connected {
                                        connection_id: sid.to_string(),
                                    };
                                    if events.send(event).await.is_err() {
                                        return Ok(StreamEnd::Closed);
                                    }
                                }
                                SocketPacket::Disconnect { .. } => {
                                    return Ok(StreamEnd::Dropped {
                                        reason: "io server disconnect".to_string(),
                                        connected: *connected,
                                    });
                                }
                                SocketPacket::ConnectError { message, .. } => {
                                    return Err(TransportError::Rejected(message));
                                }
                                SocketPacket::Event { name, args, .. } => {
                                    let event = TransportEvent::Message { event: name, args };
                                    if events.send(event).await.is_err() {
                                        return Ok(StreamEnd::Closed);
                                    }
                                }
                                SocketPacket::Ack { .. } => {}
                            }
                        }
                        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
                    }
                }
            }
        }
    }
}

impl Transport for SocketIoTransport {
    fn open(&self) -> Connection {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (emitter, outbound_rx) = Emitter::channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(self.clone().run(event_tx, outbound_rx, shutdown.clone()));

        Connection::new(event_rx, emitter, shutdown)
    }
}

fn deadline_after(liveness: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(liveness.min(MAX_LIVENESS)).unwrap_or(now)
}

fn text(packet: EnginePacket) -> Message {
    Message::Text(packet.encode().into())
}
