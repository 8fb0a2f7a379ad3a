//! Wire types shared between the browser-side client and the session server.
//!
//! ```text
//! Client <--[WS: Engine.IO / Socket.IO text frames]--> /api/socket/io
//! Client --[HTTP POST {socketId}]--> /api/socket/session/link --> {socketIndex}
//! ```
//!
//! The realtime channel only matters to the client for its lifecycle
//! (`connect` / `disconnect`) and the connection id it hands out. The link
//! call exchanges that id for a server-side session slot.

pub mod engineio;
pub mod link;
pub mod socketio;

pub use engineio::{EnginePacket, OpenPayload};
pub use link::{LinkRequest, LinkResponse};
pub use socketio::SocketPacket;

use thiserror::Error;

/// Well-known path of the realtime endpoint.
pub const SOCKET_PATH: &str = "/api/socket/io";

/// Path of the HTTP call that links a connection to a server session.
pub const SESSION_LINK_PATH: &str = "/api/socket/session/link";

/// Socket.IO namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO protocol revision spoken by the transport.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Query string selecting a direct websocket Engine.IO session.
pub fn engine_io_query() -> String {
    format!("EIO={ENGINE_IO_VERSION}&transport=websocket")
}

/// Result type for packet decoding.
pub type PacketResult<T> = Result<T, PacketError>;

/// Errors raised while decoding a text frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// The frame carried no packet type.
    #[error("empty packet")]
    Empty,

    /// The packet type digit is not part of the protocol.
    #[error("unknown packet type: {0:?}")]
    UnknownType(char),

    /// Binary attachments are not supported over the text channel.
    #[error("binary packets are not supported")]
    Binary,

    /// The JSON payload was malformed or had the wrong shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
