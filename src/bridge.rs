//! Internal publish endpoint used by the application to push events to users.

use crate::handler::Action;
use crate::http::{ParsedRequest, Response};
use crate::types::{normalize_recipients, UserId};
use bytes::Bytes;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;

/// Header carrying the shared bridge secret.
pub const SECRET_HEADER: &str = "x-chat-bridge-secret";

/// Routing field stripped from the payload before delivery.
pub const RECIPIENTS_FIELD: &str = "recipientUserIds";

/// A validated broadcast: who gets it, and the exact bytes they get.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub recipients: Vec<UserId>,
    /// JSON object without the routing field.
    pub payload: Bytes,
}

/// Authenticate and decode a `POST /publish` request.
pub fn handle_publish(req: &ParsedRequest, secret: &[u8]) -> Action {
    let presented = req.header(SECRET_HEADER).unwrap_or_default();
    if !secret_matches(presented.as_bytes(), secret) {
        tracing::debug!("publish rejected: bad bridge secret");
        return Action::Respond(Response::error(403, "Forbidden"));
    }

    match decode_broadcast(&req.body) {
        Some(publication) => Action::Publish(publication),
        None => Action::Respond(Response::error(400, "Invalid JSON")),
    }
}

fn secret_matches(presented: &[u8], expected: &[u8]) -> bool {
    !expected.is_empty() && bool::from(presented.ct_eq(expected))
}

/// Parse a JSON object body, pull out and normalise the recipient list, and re-encode
/// the remainder. `None` if the body is not a JSON object.
pub fn decode_broadcast(body: &[u8]) -> Option<Publication> {
    let mut event: Map<String, Value> = match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => map,
        _ => return None,
    };

    let recipients = match event.shift_remove(RECIPIENTS_FIELD) {
        Some(Value::Array(items)) => {
            normalize_recipients(items.iter().filter_map(coerce_user_id))
        }
        _ => Vec::new(),
    };

    // A map of JSON values always serializes.
    let payload = serde_json::to_vec(&event).ok()?;
    Some(Publication {
        recipients,
        payload: Bytes::from(payload),
    })
}

/// Integers, floats (truncated) and numeric strings count as ids. Values outside the
/// `i64` range are rejected rather than clamped.
fn coerce_user_id(value: &Value) -> Option<UserId> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_id)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_id))
        }
        _ => None,
    }
}

fn truncate_id(f: f64) -> Option<UserId> {
    let t = f.trunc();
    // 2^63 is exactly representable; every finite value below it fits.
    (t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}
