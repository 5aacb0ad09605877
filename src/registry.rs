//! Connection registry: the only owner of connection state.
//!
//! Every mutation happens on the event loop task between readiness events, so no locking
//! is needed. Handlers never touch the registry; they return an [`Action`] that the
//! registry applies.

use crate::config::RelaySettings;
use crate::error::ParseError;
use crate::events::LoopEvent;
use crate::handler::{route, Action};
use crate::http::{try_parse, Response};
use crate::socket::{encode_close, encode_text, FrameScanner};
use crate::transport::Transport;
use crate::types::{ConnectionId, UserId};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted; bytes are parsed as HTTP.
    Pending,
    /// Handshake done for an authenticated user; bytes are WebSocket frames.
    Upgraded { user_id: UserId },
    Closed,
}

/// One accepted peer.
pub struct Connection {
    id: ConnectionId,
    transport: Box<dyn Transport>,
    state: ConnState,
    buffer: Vec<u8>,
    scanner: FrameScanner,
    opened_at: Instant,
}

impl Connection {
    fn new(id: ConnectionId, transport: Box<dyn Transport>, now: Instant) -> Self {
        Self {
            id,
            transport,
            state: ConnState::Pending,
            buffer: Vec::new(),
            scanner: FrameScanner::new(),
            opened_at: now,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_upgraded(&self) -> bool {
        matches!(self.state, ConnState::Upgraded { .. })
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.state {
            ConnState::Upgraded { user_id } => Some(user_id),
            _ => None,
        }
    }

    /// Pending -> Upgraded. Refused from any other state, so the user id is set once.
    fn upgrade(&mut self, user_id: UserId) -> bool {
        if self.state != ConnState::Pending {
            return false;
        }
        self.state = ConnState::Upgraded { user_id };
        true
    }

    /// Queue bytes for the peer; false if the transport refused them.
    fn send(&self, bytes: impl Into<bytes::Bytes>) -> bool {
        match self.transport.send(bytes.into()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(conn = self.id, err = %e, "send failed");
                false
            }
        }
    }

    fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        self.buffer = Vec::new();
        self.transport.close();
    }
}

/// All open connections, keyed by id.
pub struct Registry {
    settings: RelaySettings,
    conns: HashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
}

impl Registry {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            conns: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Allocate an id no registered connection uses.
    pub fn next_id(&mut self) -> ConnectionId {
        while self.conns.contains_key(&self.next_id) {
            self.next_id = self.next_id.wrapping_add(1);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Track a freshly accepted connection. A duplicate id is refused and its transport
    /// closed.
    pub fn register(
        &mut self,
        id: ConnectionId,
        transport: Box<dyn Transport>,
        now: Instant,
    ) -> bool {
        if self.conns.contains_key(&id) {
            tracing::warn!(conn = id, "duplicate connection id refused");
            transport.close();
            return false;
        }
        self.conns.insert(id, Connection::new(id, transport, now));
        tracing::debug!(conn = id, open = self.conns.len(), "connection registered");
        true
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.conns.get(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn upgraded_count(&self) -> usize {
        self.conns.values().filter(|c| c.is_upgraded()).count()
    }

    /// Apply one I/O event.
    pub fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Data { conn, bytes } => {
                tracing::trace!(conn, len = bytes.len(), "read");
                self.on_data(conn, &bytes);
            }
            LoopEvent::Eof { conn } => {
                tracing::debug!(conn, "peer closed");
                self.close(conn);
            }
            LoopEvent::ReadFailed { conn, error } => {
                tracing::debug!(conn, err = %error, "read failed");
                self.close(conn);
            }
        }
    }

    /// Feed bytes read from `id`.
    pub fn on_data(&mut self, id: ConnectionId, bytes: &[u8]) {
        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };

        let action = match conn.state {
            ConnState::Closed => return,
            ConnState::Upgraded { .. } => {
                if conn.scanner.feed(bytes) {
                    tracing::debug!(conn = id, "close frame received");
                    conn.send(encode_close());
                    Action::Close
                } else {
                    Action::Continue
                }
            }
            ConnState::Pending => {
                conn.buffer.extend_from_slice(bytes);
                let parsed = try_parse(&conn.buffer).map(|found| {
                    found.map(|(req, rest)| (req, conn.buffer.len() - rest.len()))
                });
                match parsed {
                    Ok(Some((req, consumed))) => {
                        conn.buffer.drain(..consumed);
                        tracing::debug!(conn = id, method = %req.method, path = %req.path, "request");
                        route(&req, &self.settings)
                    }
                    Ok(None) if conn.buffer.len() > self.settings.max_request_bytes => {
                        let err = ParseError::TooLarge {
                            limit: self.settings.max_request_bytes,
                        };
                        tracing::debug!(conn = id, err = %err, "rejecting request");
                        Action::Respond(Response::error(413, "Request too large"))
                    }
                    Ok(None) => Action::Continue,
                    Err(e) => {
                        tracing::debug!(conn = id, err = %e, "dropping connection");
                        Action::Close
                    }
                }
            }
        };
        self.apply(id, action);
    }

    fn apply(&mut self, id: ConnectionId, action: Action) {
        match action {
            Action::Continue => {}
            Action::Close => {
                self.close(id);
            }
            Action::Respond(response) => {
                if let Some(conn) = self.conns.get(&id) {
                    tracing::debug!(conn = id, status = response.status, "responding");
                    conn.send(response.to_bytes());
                }
                self.close(id);
            }
            Action::Upgrade { user_id, response } => {
                let Some(conn) = self.conns.get_mut(&id) else {
                    return;
                };
                if !conn.upgrade(user_id) {
                    self.close(id);
                    return;
                }
                conn.send(response.to_bytes());
                tracing::debug!(conn = id, user_id, "upgraded");
                // Bytes after the handshake are already frames.
                let leftover = std::mem::take(&mut conn.buffer);
                if !leftover.is_empty() {
                    self.on_data(id, &leftover);
                }
            }
            Action::Publish(publication) => {
                let delivered = self.deliver(&publication.recipients, &publication.payload);
                tracing::debug!(
                    conn = id,
                    recipients = publication.recipients.len(),
                    delivered,
                    "published"
                );
                if let Some(conn) = self.conns.get(&id) {
                    conn.send(Response::ok().to_bytes());
                }
                self.close(id);
            }
        }
    }

    /// Write `payload` as one text frame to every upgraded connection owned by a recipient.
    /// Best effort; returns how many connections the frame was queued on. A connection
    /// whose transport refuses the frame is closed.
    pub fn deliver(&mut self, recipients: &[UserId], payload: &[u8]) -> usize {
        if recipients.is_empty() {
            return 0;
        }
        let targets: HashSet<UserId> = recipients.iter().copied().collect();
        let frame = encode_text(payload);
        let mut delivered = 0;
        let mut refused = Vec::new();
        for conn in self.conns.values() {
            if conn.user_id().is_some_and(|uid| targets.contains(&uid)) {
                if conn.send(frame.clone()) {
                    delivered += 1;
                } else {
                    refused.push(conn.id);
                }
            }
        }
        for id in refused {
            self.close(id);
        }
        delivered
    }

    /// Close and forget `id`. Returns false if it was not registered.
    pub fn close(&mut self, id: ConnectionId) -> bool {
        match self.conns.remove(&id) {
            Some(mut conn) => {
                conn.close();
                tracing::debug!(conn = id, open = self.conns.len(), "connection closed");
                true
            }
            None => false,
        }
    }

    /// Housekeeping: close connections that never finished a request or upgrade in time.
    /// Upgraded connections are never timed out.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.settings.pending_timeout else {
            return 0;
        };
        let stale: Vec<ConnectionId> = self
            .conns
            .values()
            .filter(|c| {
                c.state == ConnState::Pending && now.saturating_duration_since(c.opened_at) >= timeout
            })
            .map(|c| c.id)
            .collect();
        for id in &stale {
            tracing::debug!(conn = id, "pending connection timed out");
            self.close(*id);
        }
        stale.len()
    }

    pub fn close_all(&mut self) {
        for (_, mut conn) in self.conns.drain() {
            conn.close();
        }
    }
}
