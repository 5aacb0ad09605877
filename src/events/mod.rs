//! Events reported by per-connection I/O tasks to the event loop.

use crate::types::ConnectionId;
use bytes::Bytes;

/// What a connection's read task observed.
#[derive(Clone, Debug)]
pub enum LoopEvent {
    /// Bytes read from the peer.
    Data { conn: ConnectionId, bytes: Bytes },

    /// Peer closed its side (zero-byte read).
    Eof { conn: ConnectionId },

    /// Read failed; the connection is unusable.
    ReadFailed { conn: ConnectionId, error: String },
}

