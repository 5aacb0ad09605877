//! Incremental framing of a single HTTP/1.x request out of an inbound byte buffer.
//!
//! Only what the relay needs: request line, headers, and a `Content-Length` body.
//! No chunked transfer encoding. Parsing never performs I/O.

pub mod response;

pub use response::Response;

use crate::error::ParseError;
use std::collections::HashMap;

/// End of the header block.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// One complete request framed from the buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// Request target exactly as sent.
    pub target: String,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    /// Header names lower-cased, values trimmed; a repeated header keeps the last value.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    /// Header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// First decoded value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        query_param(&self.query, name)
    }

    pub fn is(&self, method: &str, path: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.path == path
    }
}

/// Try to frame one request from the front of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed. On success returns the request and the
/// unconsumed tail of `buf` (bytes belonging to a following request).
pub fn try_parse(buf: &[u8]) -> Result<Option<(ParsedRequest, &[u8])>, ParseError> {
    let head_len = match find_terminator(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let head = String::from_utf8_lossy(&buf[..head_len]);
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) => (m.to_string(), t.to_string()),
        _ => return Err(ParseError::MalformedRequestLine),
    };

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let body_len = headers
        .get("content-length")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0) as usize;

    let body_start = head_len + HEADER_TERMINATOR.len();
    let body_end = match body_start.checked_add(body_len) {
        Some(end) if end <= buf.len() => end,
        _ => return Ok(None),
    };

    let (path, query) = split_target(&target);
    let request = ParsedRequest {
        method,
        target,
        path,
        query,
        headers,
        body: buf[body_start..body_end].to_vec(),
    };
    Ok(Some((request, &buf[body_end..])))
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Split a request target into path and query. Accepts origin-form (`/ws?x=1`) and
/// absolute-form (`http://host/ws?x=1`); drops any fragment.
fn split_target(target: &str) -> (String, String) {
    let without_fragment = target.split('#').next().unwrap_or_default();

    let origin = match without_fragment.find("://") {
        Some(scheme_end) => {
            let after_authority = &without_fragment[scheme_end + 3..];
            match after_authority.find(['/', '?']) {
                Some(i) => &after_authority[i..],
                None => "",
            }
        }
        None => without_fragment,
    };

    let (path, query) = match origin.split_once('?') {
        Some((p, q)) => (p, q),
        None => (origin, ""),
    };
    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), query.to_string())
}

/// Look up `name` in a raw `a=1&b=2` query string. Values are percent-decoded, `+` as space.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key) == name).then(|| decode_component(value))
        })
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
