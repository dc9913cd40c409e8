use axum::extract::ws::Utf8Bytes;

use codeclash_core::net::messages::{ServerMessage, Status};
use codeclash_core::net::protocol::encode_server_message;
use codeclash_core::player::ConnectionId;

use crate::registry::{ConnectionRegistry, Outbound};

/// Which connections a status broadcast reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every open connection, joined or not.
    All,
    /// The listed participants' connections.
    Survivors(Vec<ConnectionId>),
}

impl Audience {
    pub fn includes(&self, id: ConnectionId) -> bool {
        match self {
            Self::All => true,
            Self::Survivors(ids) => ids.contains(&id),
        }
    }
}

/// Serialize a status into a text frame ready for fan-out.
pub fn status_frame(status: Status) -> Option<Outbound> {
    match encode_server_message(&ServerMessage::Status(status)) {
        Ok(json) => Some(Outbound::Text(Utf8Bytes::from(json))),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode status");
            None
        },
    }
}

/// Send a status to a single connection.
pub fn send_status(registry: &ConnectionRegistry, to: ConnectionId, status: Status) {
    if let Some(frame) = status_frame(status) {
        registry.send(to, frame);
    }
}

/// Encode a status once and deliver it to every connection in `audience`.
pub fn broadcast_status(registry: &ConnectionRegistry, audience: &Audience, status: Status) {
    if let Some(frame) = status_frame(status) {
        registry.broadcast(|id| audience.includes(id), &frame);
    }
}
