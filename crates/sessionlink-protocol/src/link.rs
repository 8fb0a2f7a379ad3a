//! Session link handshake bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/socket/session/link`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    /// Connection id assigned by the realtime transport.
    pub socket_id: String,
}

impl LinkRequest {
    pub fn new(socket_id: impl Into<String>) -> Self {
        Self {
            socket_id: socket_id.into(),
        }
    }
}

/// Successful response of the link call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    /// Server-assigned session slot for the linked connection.
    pub socket_index: u32,
}
