//! Client-side realtime session binding.
//!
//! Two process-wide components:
//!
//! - [`SessionBinder`] owns the realtime connection, links every fresh
//!   connection id to a server-side session slot, and publishes the result.
//! - [`TransitionCoordinator`] shows a pending state for a short delay before
//!   handing a full-page navigation to the host's navigation primitive.
//!
//! Both publish read-only snapshots; consumers never mutate them.

pub mod binder;
pub mod config;
pub mod link;
pub mod observe;
pub mod transition;
pub mod transport;

pub use binder::{Binding, BindingHandle, BinderState, SessionBinder};
pub use config::ClientConfig;
pub use link::{LinkClient, LinkError, LinkResult, SessionLinker};
pub use observe::Subscription;
pub use transition::{
    HardRedirect, NavigationError, Navigator, PendingTransition, ReentryPolicy,
    TransitionCoordinator, TransitionOutcome, TransitionPhase,
};
pub use transport::{Connection, Emitter, SocketIoTransport, Transport, TransportEvent};
