//! Request routing. Handlers are pure: they inspect a parsed request and return the
//! transition the registry should apply to the connection.

use crate::bridge::{handle_publish, Publication};
use crate::config::RelaySettings;
use crate::http::{ParsedRequest, Response};
use crate::socket::handshake::{handle_upgrade, wants_upgrade};
use crate::types::UserId;

/// Outcome of handling input on a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until more bytes arrive.
    Continue,
    /// Drop the connection without a response.
    Close,
    /// Write the response, then close.
    Respond(Response),
    /// Write the 101 response and mark the connection upgraded for `user_id`.
    Upgrade { user_id: UserId, response: Response },
    /// Deliver to the recipients, answer `200 {"ok":true}`, then close.
    Publish(Publication),
}

/// Dispatch a complete request from a not-yet-upgraded connection.
pub fn route(req: &ParsedRequest, settings: &RelaySettings) -> Action {
    if req.is("GET", "/ws") && wants_upgrade(req) {
        return handle_upgrade(req, &settings.codec);
    }
    if req.is("POST", "/publish") {
        return handle_publish(req, settings.bridge_secret.as_bytes());
    }
    Action::Respond(Response::not_found())
}
