//! Versioned binding slot.
//!
//! Every writer presents the version it observed (a generation, or a
//! [`LinkTicket`]) and is turned away when that version is no longer live.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::{BinderState, Binding, LinkTicket};
use crate::transport::Emitter;

/// A write presented with a superseded version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stale;

#[derive(Debug)]
pub(crate) struct BindingSlot {
    generation: u64,
    state: BinderState,
    connection: Option<(String, Emitter)>,
    binding: Option<Binding>,
    /// Advanced whenever the underlying connection changes or goes away;
    /// published bindings stop emitting once it moves past their epoch.
    live: Arc<AtomicU64>,
}

impl BindingSlot {
    pub(crate) fn new() -> Self {
        Self {
            generation: 0,
            state: BinderState::Disconnected,
            connection: None,
            binding: None,
            live: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn state(&self) -> BinderState {
        self.state
    }

    pub(crate) fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    /// A new underlying connection is being opened.
    pub(crate) fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.advance();
        self.state = BinderState::Connecting;
        self.connection = None;
        self.binding = None;
        self.generation
    }

    /// The transport reported a connect for `generation`. Returns the ticket
    /// the link handshake must present.
    pub(crate) fn connected(
        &mut self,
        generation: u64,
        connection_id: String,
        emitter: Emitter,
    ) -> Result<LinkTicket, Stale> {
        if generation != self.generation || self.state == BinderState::Closed {
            return Err(Stale);
        }
        self.advance();
        self.state = BinderState::Connected;
        self.binding = None;
        self.connection = Some((connection_id.clone(), emitter));
        Ok(LinkTicket {
            generation,
            connection_id,
        })
    }

    pub(crate) fn begin_link(&mut self, ticket: &LinkTicket) -> Result<(), Stale> {
        if !self.is_current(ticket) || self.state != BinderState::Connected {
            return Err(Stale);
        }
        self.state = BinderState::Linking;
        Ok(())
    }

    /// Apply a handshake response.
    pub(crate) fn linked(&mut self, ticket: &LinkTicket, session_index: u32) -> Result<&Binding, Stale> {
        if !self.is_current(ticket) || self.state != BinderState::Linking {
            return Err(Stale);
        }
        let Some((_, emitter)) = self.connection.as_ref() else {
            return Err(Stale);
        };
        self.state = BinderState::Linked;
        let binding = Binding::new(
            ticket.clone(),
            session_index,
            emitter.clone(),
            self.live.clone(),
        );
        Ok(self.binding.insert(binding))
    }

    /// The handshake for `ticket` failed; stay connected but unlinked.
    pub(crate) fn link_failed(&mut self, ticket: &LinkTicket) -> Result<(), Stale> {
        if !self.is_current(ticket) || self.state != BinderState::Linking {
            return Err(Stale);
        }
        self.state = BinderState::Connected;
        Ok(())
    }

    /// The transport lost the connection of `generation`.
    pub(crate) fn disconnected(&mut self, generation: u64) -> Result<(), Stale> {
        if generation != self.generation || self.state == BinderState::Closed {
            return Err(Stale);
        }
        self.advance();
        self.state = BinderState::Disconnected;
        self.connection = None;
        self.binding = None;
        Ok(())
    }

    /// Explicit stop. Returns whether anything changed.
    pub(crate) fn close(&mut self) -> bool {
        if self.state == BinderState::Closed {
            return false;
        }
        self.advance();
        self.state = BinderState::Closed;
        self.connection = None;
        self.binding = None;
        true
    }

    fn advance(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    fn is_current(&self, ticket: &LinkTicket) -> bool {
        ticket.generation == self.generation
            && self
                .connection
                .as_ref()
                .is_some_and(|(id, _)| *id == ticket.connection_id)
    }
}
