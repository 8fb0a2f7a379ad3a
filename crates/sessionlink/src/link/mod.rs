//! Session link handshake.
//!
//! Exchanges a realtime connection id for the index of the server-side
//! session slot it has been attached to.

mod client;
mod error;

use async_trait::async_trait;

pub use client::LinkClient;
pub use error::{LinkError, LinkResult};

/// Minimal link API abstraction for testability.
#[async_trait]
pub trait SessionLinker: Send + Sync {
    /// Link `connection_id` to a server session and return its index.
    async fn link(&self, connection_id: &str) -> LinkResult<u32>;
}

#[async_trait]
impl SessionLinker for LinkClient {
    async fn link(&self, connection_id: &str) -> LinkResult<u32> {
        self.link(connection_id).await
    }
}
