use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::transport::{Emitter, TransportError, TransportResult};

/// Lifecycle of the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinderState {
    Disconnected,
    Connecting,
    /// Connected but not linked, either before the handshake starts or after
    /// it failed.
    Connected,
    Linking,
    Linked,
    /// Stopped explicitly; nothing changes until the next `start()`.
    Closed,
}

impl fmt::Display for BinderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinderState::Disconnected => write!(f, "disconnected"),
            BinderState::Connecting => write!(f, "connecting"),
            BinderState::Connected => write!(f, "connected"),
            BinderState::Linking => write!(f, "linking"),
            BinderState::Linked => write!(f, "linked"),
            BinderState::Closed => write!(f, "closed"),
        }
    }
}

/// The version a handshake was started for. A handshake result is applied
/// only while the binder is still linking exactly this ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkTicket {
    pub generation: u64,
    pub connection_id: String,
}

/// Published snapshot of a linked connection.
///
/// The transport reuses one outbound channel across its reconnects, so a
/// snapshot only emits while the connection it was linked on is still the
/// live one.
#[derive(Debug, Clone)]
pub struct Binding {
    pub connection_id: String,
    pub session_index: u32,
    pub generation: u64,
    emitter: Emitter,
    /// Slot epoch at link time, compared against the slot's current epoch.
    epoch: u64,
    live: Arc<AtomicU64>,
}

impl Binding {
    pub(crate) fn new(
        ticket: LinkTicket,
        session_index: u32,
        emitter: Emitter,
        live: Arc<AtomicU64>,
    ) -> Self {
        Self {
            connection_id: ticket.connection_id,
            session_index,
            generation: ticket.generation,
            emitter,
            epoch: live.load(Ordering::Acquire),
            live,
        }
    }

    /// Whether this snapshot still describes the live connection.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.epoch
    }

    /// Send an event over the bound connection. Fails with
    /// [`TransportError::Closed`] once that connection is gone, even if the
    /// transport has since reconnected.
    pub fn emit(&self, event: impl Into<String>, args: Vec<Value>) -> TransportResult<()> {
        if !self.is_live() {
            return Err(TransportError::Closed);
        }
        self.emitter.emit(event, args)
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id
            && self.session_index == other.session_index
            && self.generation == other.generation
    }
}

impl Eq for Binding {}
