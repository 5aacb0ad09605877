//! Server side of the WebSocket opening handshake.

use crate::handler::Action;
use crate::http::{ParsedRequest, Response};
use crate::token::TokenCodec;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(SHA1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// Whether the request asks for a websocket upgrade (`Upgrade` header lists `websocket`).
pub fn wants_upgrade(req: &ParsedRequest) -> bool {
    req.header("upgrade").is_some_and(|v| {
        v.split(',')
            .any(|t| t.trim().eq_ignore_ascii_case("websocket"))
    })
}

/// Validate an upgrade request and authenticate its `token` query parameter.
pub fn handle_upgrade(req: &ParsedRequest, codec: &TokenCodec) -> Action {
    let key = match req.header("sec-websocket-key") {
        Some(k) if !k.is_empty() => k,
        _ => return Action::Respond(Response::error(400, "Missing Sec-WebSocket-Key")),
    };

    let user_id = match req
        .query_param("token")
        .and_then(|token| codec.verify(&token))
    {
        Some(uid) => uid,
        None => return Action::Respond(Response::error(401, "Unauthorized")),
    };

    Action::Upgrade {
        user_id,
        response: Response::switching_protocols(&accept_key(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::try_parse;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"handshake-secret").unwrap()
    }

    fn upgrade_request(query: &str, key: Option<&str>) -> ParsedRequest {
        let key_line = key
            .map(|k| format!("Sec-WebSocket-Key: {k}\r\n"))
            .unwrap_or_default();
        let raw = format!(
            "GET /ws{query} HTTP/1.1\r\nHost: x\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n{key_line}\r\n"
        );
        try_parse(raw.as_bytes()).unwrap().unwrap().0
    }

    #[test]
    fn rfc6455_accept_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn upgrade_header_token_list() {
        let req = upgrade_request("", Some("k"));
        assert!(wants_upgrade(&req));
        let mut other = req.clone();
        other
            .headers
            .insert("upgrade".into(), "h2c, websocket".into());
        assert!(wants_upgrade(&other));
        other.headers.insert("upgrade".into(), "h2c".into());
        assert!(!wants_upgrade(&other));
        other.headers.remove("upgrade");
        assert!(!wants_upgrade(&other));
    }

    #[test]
    fn valid_token_upgrades() {
        let c = codec();
        let token = c.issue(7, 60);
        let req = upgrade_request(&format!("?token={token}"), Some("dGhlIHNhbXBsZSBub25jZQ=="));
        match handle_upgrade(&req, &c) {
            Action::Upgrade { user_id, response } => {
                assert_eq!(user_id, 7);
                assert_eq!(response.status, 101);
                assert_eq!(
                    response.header("Sec-WebSocket-Accept"),
                    Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_key_is_bad_request() {
        let c = codec();
        let token = c.issue(7, 60);
        let req = upgrade_request(&format!("?token={token}"), None);
        assert!(matches!(handle_upgrade(&req, &c), Action::Respond(r) if r.status == 400));
        let req = upgrade_request(&format!("?token={token}"), Some(""));
        assert!(matches!(handle_upgrade(&req, &c), Action::Respond(r) if r.status == 400));
    }

    #[test]
    fn bad_or_missing_token_is_unauthorized() {
        let c = codec();
        let expired = c.issue(7, -1);
        for query in [
            String::new(),
            "?token=".to_string(),
            "?token=garbage".to_string(),
            format!("?token={expired}"),
        ] {
            let req = upgrade_request(&query, Some("dGhlIHNhbXBsZSBub25jZQ=="));
            assert!(
                matches!(handle_upgrade(&req, &c), Action::Respond(r) if r.status == 401),
                "{query}"
            );
        }
    }
}
