//! Session binder.
//!
//! Owns the single realtime connection of a client run and links each fresh
//! connection id to a server-side session slot.
//!
//! ## Lifecycle
//!
//! ```text
//! start() -> Connecting --connect--> Connected --> Linking --ok--> Linked
//!                                        ^            |
//!                                        +---failed---+
//! disconnect (any state but Closed) -> Disconnected
//! stop() -> Closed
//! ```
//!
//! `start()` bumps the generation. Handshake responses carry the ticket they
//! were issued for and are dropped if the connection they belong to has been
//! replaced, lost, or closed in the meantime.

mod slot;
mod state;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use state::{BinderState, Binding, LinkTicket};

use crate::config::ClientConfig;
use crate::link::{LinkClient, LinkResult, SessionLinker};
use crate::observe::{Listeners, Subscription};
use crate::transport::{Connection, SocketIoTransport, Transport, TransportEvent};
use slot::BindingSlot;

/// Size of the broadcast channel for application events.
const MESSAGE_BUFFER_SIZE: usize = 256;

/// Process-wide binder; clones share the same connection.
#[derive(Clone)]
pub struct SessionBinder {
    inner: Arc<BinderInner>,
}

struct BinderInner {
    transport: Arc<dyn Transport>,
    linker: Arc<dyn SessionLinker>,
    slot: Mutex<BindingSlot>,
    /// Held across a whole start/stop so concurrent calls serialize.
    driver: Mutex<Option<Driver>>,
    binding_tx: watch::Sender<Option<Binding>>,
    state_tx: watch::Sender<BinderState>,
    listeners: Arc<Listeners<Option<Binding>>>,
    messages_tx: broadcast::Sender<TransportEvent>,
}

/// Event loop of one generation.
struct Driver {
    generation: u64,
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Driver {
    fn stop(self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

impl SessionBinder {
    pub fn new(transport: Arc<dyn Transport>, linker: Arc<dyn SessionLinker>) -> Self {
        let (binding_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(BinderState::Disconnected);
        let (messages_tx, _) = broadcast::channel(MESSAGE_BUFFER_SIZE);

        Self {
            inner: Arc::new(BinderInner {
                transport,
                linker,
                slot: Mutex::new(BindingSlot::new()),
                driver: Mutex::new(None),
                binding_tx,
                state_tx,
                listeners: Listeners::new(),
                messages_tx,
            }),
        }
    }

    /// Binder over the Socket.IO transport and HTTP link client.
    pub fn from_config(config: &ClientConfig) -> LinkResult<Self> {
        let transport = SocketIoTransport::from_config(config);
        let linker = LinkClient::from_config(config)?;
        Ok(Self::new(Arc::new(transport), Arc::new(linker)))
    }

    /// Open a new connection, tearing down the current one first.
    ///
    /// Returns the new generation. Must be called within a tokio runtime.
    pub fn start(&self) -> u64 {
        let mut driver = lock(&self.inner.driver);
        if let Some(previous) = driver.take() {
            debug!("Tearing down connection generation {}", previous.generation);
            previous.stop();
        }

        let (generation, changed) = {
            let mut slot = lock(&self.inner.slot);
            let generation = slot.begin();
            (generation, self.inner.publish(&slot))
        };

        let connection = self.inner.transport.open();
        let shutdown = connection.shutdown_token();
        let task = tokio::spawn(drive(Arc::downgrade(&self.inner), generation, connection));
        *driver = Some(Driver {
            generation,
            task,
            shutdown,
        });

        drop(driver);

        info!("Opened realtime connection generation {}", generation);
        if changed {
            self.inner.notify();
        }
        generation
    }

    /// Close the connection and clear the published binding.
    ///
    /// Safe to call repeatedly and before any `start()`.
    pub fn stop(&self) {
        let mut driver = lock(&self.inner.driver);
        let Some(previous) = driver.take() else {
            return;
        };
        previous.stop();

        let (closed, changed) = {
            let mut slot = lock(&self.inner.slot);
            let closed = slot.close();
            (closed, closed && self.inner.publish(&slot))
        };
        drop(driver);

        if closed {
            info!("Realtime connection closed");
        }
        if changed {
            self.inner.notify();
        }
    }

    /// Register a listener called with every newly published binding.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Option<Binding>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Read-only view for consumers.
    pub fn handle(&self) -> BindingHandle {
        BindingHandle {
            binding: self.inner.binding_tx.subscribe(),
            state: self.inner.state_tx.subscribe(),
        }
    }

    /// Application events received on the live connection.
    pub fn messages(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.messages_tx.subscribe()
    }

    pub fn current(&self) -> Option<Binding> {
        self.inner.binding_tx.borrow().clone()
    }

    pub fn state(&self) -> BinderState {
        *self.inner.state_tx.borrow()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner.slot).generation()
    }
}

impl std::fmt::Debug for SessionBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinder")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("binding", &self.current())
            .finish()
    }
}

impl BinderInner {
    /// Mirror the slot into the watch channels. Called with the slot locked
    /// so published values follow slot order. Returns whether the binding
    /// itself changed.
    fn publish(&self, slot: &BindingSlot) -> bool {
        let binding = slot.binding().cloned();
        let changed = self.binding_tx.send_if_modified(|current| {
            if *current == binding {
                return false;
            }
            *current = binding;
            true
        });
        self.state_tx.send_if_modified(|current| {
            if *current == slot.state() {
                return false;
            }
            *current = slot.state();
            true
        });
        changed
    }

    /// Run listeners against the latest binding. Called without any lock
    /// held so listeners may call back into the binder.
    fn notify(&self) {
        let binding = self.binding_tx.borrow().clone();
        self.listeners.notify(&binding);
    }

    fn on_connected(self: &Arc<Self>, generation: u64, connection: &Connection, connection_id: String) {
        let (ticket, changed) = {
            let mut slot = lock(&self.slot);
            let ticket = match slot.connected(generation, connection_id, connection.emitter()) {
                Ok(ticket) => ticket,
                Err(_) => {
                    debug!("Ignoring connect for superseded generation {}", generation);
                    return;
                }
            };
            if slot.begin_link(&ticket).is_err() {
                return;
            }
            (ticket, self.publish(&slot))
        };
        if changed {
            self.notify();
        }

        info!(
            "Connected as {} (generation {}); linking session",
            ticket.connection_id, ticket.generation
        );

        let linker = self.linker.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = linker.link(&ticket.connection_id).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_link_result(&ticket, result);
            }
        });
    }

    fn on_link_result(&self, ticket: &LinkTicket, result: LinkResult<u32>) {
        match result {
            Ok(session_index) => {
                {
                    let mut slot = lock(&self.slot);
                    if slot.linked(ticket, session_index).is_err() {
                        debug!(
                            "Discarding stale link response for {} (generation {}, index {})",
                            ticket.connection_id, ticket.generation, session_index
                        );
                        return;
                    }
                    self.publish(&slot);
                }
                info!(
                    "Connection {} linked to session index {}",
                    ticket.connection_id, session_index
                );
                self.notify();
            }
            Err(e) => {
                {
                    let mut slot = lock(&self.slot);
                    if slot.link_failed(ticket).is_err() {
                        debug!(
                            "Discarding stale link failure for {}: {}",
                            ticket.connection_id, e
                        );
                        return;
                    }
                    self.publish(&slot);
                }
                warn!(
                    "Session link for {} failed, staying unlinked until the next connect: {}",
                    ticket.connection_id, e
                );
            }
        }
    }

    fn on_disconnected(&self, generation: u64, reason: &str) {
        let changed = {
            let mut slot = lock(&self.slot);
            if slot.disconnected(generation).is_err() {
                return;
            }
            self.publish(&slot)
        };
        info!("Realtime connection lost: {}", reason);
        if changed {
            self.notify();
        }
    }
}

impl Drop for BinderInner {
    fn drop(&mut self) {
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(driver) = driver.take() {
            driver.stop();
        }
    }
}

async fn drive(inner: Weak<BinderInner>, generation: u64, mut connection: Connection) {
    while let Some(event) = connection.next_event().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Connected { connection_id } => {
                inner.on_connected(generation, &connection, connection_id);
            }
            TransportEvent::Disconnected { reason } => {
                inner.on_disconnected(generation, &reason);
            }
            message @ TransportEvent::Message { .. } => {
                // No receivers is fine.
                let _ = inner.messages_tx.send(message);
            }
        }
    }
    debug!("Transport for generation {} finished", generation);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read-only, clonable view of the published binding.
#[derive(Debug, Clone)]
pub struct BindingHandle {
    binding: watch::Receiver<Option<Binding>>,
    state: watch::Receiver<BinderState>,
}

impl BindingHandle {
    pub fn current(&self) -> Option<Binding> {
        self.binding.borrow().clone()
    }

    pub fn state(&self) -> BinderState {
        *self.state.borrow()
    }

    /// Whether the connection is linked to a session.
    pub fn is_linked(&self) -> bool {
        self.binding.borrow().is_some()
    }

    /// Wait for the next published change. `None` once the binder is gone.
    pub async fn changed(&mut self) -> Option<Option<Binding>> {
        self.binding.changed().await.ok()?;
        Some(self.binding.borrow_and_update().clone())
    }

    /// Wait until linked, up to `timeout`.
    pub async fn wait_linked(&mut self, timeout: Duration) -> Option<Binding> {
        let wait = self.binding.wait_for(Option::is_some);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(binding)) => binding.clone(),
            _ => None,
        }
    }
}
