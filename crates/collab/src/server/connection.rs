//! Connection identity and the per-client send handle.
//!
//! Each accepted WebSocket gets an unbounded channel drained onto the
//! socket by a forwarder task. Everything that needs to reach the client
//! (command replies, room broadcasts, topic fan-out) holds a cheap clone
//! of its [`ClientHandle`].

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::message::ServerMessage;

/// Wire-visible identity of a client connection.
///
/// This is the "socket id" clients see in `user_joined`, operation acks
/// and kick targets, so it is a plain `u64` on the wire. Fresh ids exist
/// only for real connections: [`ClientHandle::open`] assigns them. A value
/// quoted back by a client (the target of a `kick_user`) is wrapped as-is
/// via `From<u64>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// The raw value as it travels on the wire.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket {}", self.0)
    }
}

/// Sending side of a client connection.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    /// The connection's wire id.
    pub id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientHandle {
    /// Wrap a freshly accepted connection's outgoing channel, assigning
    /// the next wire id.
    pub fn open(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            tx,
        }
    }

    /// Send a message to this client. Fails only when the connection's
    /// forwarder task has already gone away.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.tx.send(msg).map_err(|_| SendError::ChannelClosed(self.id))
    }
}

/// Error when sending a message fails.
#[derive(Debug, Clone)]
pub enum SendError {
    /// The channel to the client is closed.
    ChannelClosed(ConnectionId),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::ChannelClosed(id) => write!(f, "channel closed for {}", id),
        }
    }
}

impl std::error::Error for SendError {}
