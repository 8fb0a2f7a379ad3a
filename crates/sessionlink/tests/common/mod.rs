//! Test utilities: scripted transport, scripted linker, recording navigators.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sessionlink::link::{LinkError, LinkResult, SessionLinker};
use sessionlink::transition::{HardRedirect, NavigationError, Navigator};
use sessionlink::transport::{Connection, Emitter, OutboundMessage, Transport, TransportEvent};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Let every ready task run. Relies on the paused test clock auto-advancing
/// only once the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Transport whose connections are driven by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    opened: Mutex<Vec<ScriptedConnection>>,
}

/// Test-side end of a connection opened by [`ScriptedTransport`].
#[derive(Clone)]
pub struct ScriptedConnection {
    events: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
    outbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundMessage>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> ScriptedConnection {
        self.opened.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> ScriptedConnection {
        self.opened
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection opened")
    }
}

impl Transport for ScriptedTransport {
    fn open(&self) -> Connection {
        let (events, rx) = mpsc::channel(16);
        let (emitter, outbound) = Emitter::channel();
        let shutdown = CancellationToken::new();
        self.opened.lock().unwrap().push(ScriptedConnection {
            events,
            shutdown: shutdown.clone(),
            outbound: Arc::new(tokio::sync::Mutex::new(outbound)),
        });
        Connection::new(rx, emitter, shutdown)
    }
}

impl ScriptedConnection {
    /// Deliver an event; false if the binder no longer listens.
    pub async fn send(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub async fn connect(&self, connection_id: &str) -> bool {
        self.send(TransportEvent::Connected {
            connection_id: connection_id.to_string(),
        })
        .await
    }

    pub async fn disconnect(&self) -> bool {
        self.send(TransportEvent::Disconnected {
            reason: "transport close".to_string(),
        })
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn next_outbound(&self) -> Option<OutboundMessage> {
        self.outbound.lock().await.recv().await
    }
}

/// Linker whose responses are released by the test, in any order.
pub struct ScriptedLinker {
    calls_tx: mpsc::UnboundedSender<LinkCall>,
    calls_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LinkCall>>,
}

pub struct LinkCall {
    pub connection_id: String,
    respond: oneshot::Sender<LinkResult<u32>>,
}

impl LinkCall {
    pub fn succeed(self, session_index: u32) {
        let _ = self.respond.send(Ok(session_index));
    }

    pub fn fail(self) {
        let _ = self.respond.send(Err(LinkError::Status {
            status: 500,
            body: "session store unavailable".to_string(),
        }));
    }
}

impl ScriptedLinker {
    pub fn new() -> Arc<Self> {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            calls_tx,
            calls_rx: tokio::sync::Mutex::new(calls_rx),
        })
    }

    pub async fn next_call(&self) -> LinkCall {
        self.calls_rx
            .lock()
            .await
            .recv()
            .await
            .expect("linker channel closed")
    }

    /// A call already issued, without waiting.
    pub async fn try_next_call(&self) -> Option<LinkCall> {
        self.calls_rx.lock().await.try_recv().ok()
    }
}

#[async_trait]
impl SessionLinker for ScriptedLinker {
    async fn link(&self, connection_id: &str) -> LinkResult<u32> {
        let (respond, response) = oneshot::channel();
        let call = LinkCall {
            connection_id: connection_id.to_string(),
            respond,
        };
        if self.calls_tx.send(call).is_err() {
            return Err(LinkError::InvalidResponse("linker gone".to_string()));
        }
        response
            .await
            .unwrap_or_else(|_| Err(LinkError::InvalidResponse("call dropped".to_string())))
    }
}

/// Navigator that records what it was asked to do and when.
#[derive(Default)]
pub struct RecordingNavigator {
    navigations: Mutex<Vec<(String, Instant)>>,
    prefetches: Mutex<Vec<String>>,
    fail: bool,
    gate: Option<Arc<Notify>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// Navigations block until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn navigated_at(&self) -> Vec<Instant> {
        self.navigations
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn prefetches(&self) -> Vec<String> {
        self.prefetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    async fn navigate(&self, url: &str) -> Result<(), NavigationError> {
        self.navigations
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(NavigationError::Failed {
                url: url.to_string(),
                message: "route not found".to_string(),
            });
        }
        Ok(())
    }

    fn prefetch(&self, url: &str) {
        self.prefetches.lock().unwrap().push(url.to_string());
    }
}

/// Hard redirect that records target URLs.
#[derive(Default)]
pub struct RecordingRedirect {
    redirects: Mutex<Vec<String>>,
}

impl RecordingRedirect {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl HardRedirect for RecordingRedirect {
    fn redirect(&self, url: &str) {
        self.redirects.lock().unwrap().push(url.to_string());
    }
}
