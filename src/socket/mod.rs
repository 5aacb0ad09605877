//! WebSocket framing for the server side of the relay.
//!
//! Outbound frames are unmasked, single-fragment text frames. Inbound traffic is not part
//! of the protocol; it is only scanned for a close opcode and otherwise discarded.

pub mod handshake;

use bytes::{BufMut, Bytes, BytesMut};

/// FIN bit of the first header byte.
const FIN: u8 = 0x80;
/// MASK bit of the second header byte.
const MASK: u8 = 0x80;
/// Largest length that fits the 7-bit field.
const MAX_SHORT_LEN: usize = 125;
const LEN_16_MARKER: u8 = 126;
const LEN_64_MARKER: u8 = 127;

/// Longest possible frame header: 2 + 8 (length) + 4 (mask).
pub const MAX_HEADER_LEN: usize = 14;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl OpCode {
    /// Opcode from the low nibble of a frame's first byte.
    pub fn from_first_byte(byte: u8) -> Self {
        match byte & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(v) => v & 0x0F,
        }
    }
}

/// Whether `buf` starts with a close frame.
#[inline]
pub fn is_close_frame(buf: &[u8]) -> bool {
    buf.first()
        .is_some_and(|b| OpCode::from_first_byte(*b) == OpCode::Close)
}

/// Encode a UTF-8 payload as one unmasked text frame.
pub fn encode_text(payload: &[u8]) -> Bytes {
    encode_frame(OpCode::Text, payload)
}

/// Empty close frame sent in reply to a client close.
pub fn encode_close() -> Bytes {
    encode_frame(OpCode::Close, &[])
}

fn encode_frame(opcode: OpCode, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(MAX_HEADER_LEN + payload.len());
    out.put_u8(FIN | opcode.as_u8());
    write_payload_len(&mut out, payload.len());
    out.extend_from_slice(payload);
    out.freeze()
}

/// Writes the length field: 7-bit, `126` + u16 BE, or `127` + u64 BE.
#[inline]
fn write_payload_len(buf: &mut BytesMut, len: usize) {
    if len <= MAX_SHORT_LEN {
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(LEN_16_MARKER);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(LEN_64_MARKER);
        buf.put_u64(len as u64);
    }
}

/// Parsed frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    /// Bytes taken by the header, including any masking key.
    pub header_len: usize,
    pub payload_len: u64,
}

/// Decode a frame header from the front of `buf`; `None` until the whole header is present.
pub fn decode_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < 2 {
        return None;
    }
    let masked = buf[1] & MASK != 0;
    let (len_field, payload_len) = match buf[1] & 0x7F {
        LEN_16_MARKER => {
            let b = buf.get(2..4)?;
            (2, u16::from_be_bytes([b[0], b[1]]) as u64)
        }
        LEN_64_MARKER => {
            let b: [u8; 8] = buf.get(2..10)?.try_into().ok()?;
            (8, u64::from_be_bytes(b))
        }
        short => (0, short as u64),
    };
    let header_len = 2 + len_field + if masked { 4 } else { 0 };
    if buf.len() < header_len {
        return None;
    }
    Some(FrameHeader {
        fin: buf[0] & FIN != 0,
        opcode: OpCode::from_first_byte(buf[0]),
        masked,
        header_len,
        payload_len,
    })
}

/// Walks inbound frames across reads, discarding payloads and reporting a close opcode.
///
/// Holds at most one partial header; payload bytes are skipped as they arrive.
#[derive(Debug, Default)]
pub struct FrameScanner {
    header: Vec<u8>,
    skip: u64,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes. Returns true once a close frame starts.
    pub fn feed(&mut self, mut input: &[u8]) -> bool {
        loop {
            if self.skip > 0 {
                let n = self.skip.min(input.len() as u64) as usize;
                self.skip -= n as u64;
                input = &input[n..];
            }
            let Some((&byte, rest)) = input.split_first() else {
                return false;
            };
            input = rest;

            if self.header.is_empty() && is_close_frame(&[byte]) {
                return true;
            }
            self.header.push(byte);
            if let Some(h) = decode_header(&self.header) {
                self.skip = h.payload_len;
                self.header.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mask = [1u8, 2, 3, 4];
        let mut out = vec![FIN | opcode];
        if payload.len() <= MAX_SHORT_LEN {
            out.push(MASK | payload.len() as u8);
        } else {
            out.push(MASK | LEN_16_MARKER);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(&mask);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        out
    }

    #[test]
    fn length_field_boundaries() {
        for (len, header_len, marker) in [
            (0usize, 2usize, 0u8),
            (125, 2, 125),
            (126, 4, LEN_16_MARKER),
            (65535, 4, LEN_16_MARKER),
            (65536, 10, LEN_64_MARKER),
        ] {
            let payload = vec![b'a'; len];
            let frame = encode_text(&payload);
            assert_eq!(frame[0], 0x81);
            assert_eq!(frame[1], marker, "len {len}");
            let h = decode_header(&frame).unwrap();
            assert_eq!(h.header_len, header_len);
            assert_eq!(h.payload_len, len as u64);
            assert!(h.fin && !h.masked);
            assert_eq!(h.opcode, OpCode::Text);
            assert_eq!(&frame[h.header_len..], &payload[..]);
        }
    }

    #[test]
    fn extended_lengths_are_big_endian() {
        let frame = encode_text(&vec![0u8; 300]);
        assert_eq!(&frame[1..4], &[126, 0x01, 0x2C]);
        let frame = encode_text(&vec![0u8; 65536]);
        assert_eq!(&frame[1..10], &[127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn close_frame_detection() {
        assert!(is_close_frame(&[0x88, 0x80, 0, 0, 0, 0]));
        assert!(is_close_frame(&encode_close()));
        assert!(!is_close_frame(&encode_text(b"hi")));
        assert!(!is_close_frame(&[]));
    }

    #[test]
    fn partial_header_decodes_none() {
        let frame = masked_frame(0x1, &[0u8; 200]);
        assert_eq!(decode_header(&frame[..1]), None);
        assert_eq!(decode_header(&frame[..3]), None);
        assert_eq!(decode_header(&frame[..7]), None);
        let h = decode_header(&frame[..8]).unwrap();
        assert!(h.masked);
        assert_eq!(h.header_len, 8);
        assert_eq!(h.payload_len, 200);
    }

    #[test]
    fn scanner_finds_close_after_data_frames() {
        let mut stream = masked_frame(0x1, b"hello");
        stream.extend(masked_frame(0x9, b""));
        stream.extend(masked_frame(0x8, &[0x03, 0xE8]));
        let mut scanner = FrameScanner::new();
        assert!(scanner.feed(&stream));
    }

    #[test]
    fn scanner_handles_byte_at_a_time_reads() {
        let mut stream = masked_frame(0x1, &[0x88; 300]);
        let close_at = stream.len();
        stream.extend(masked_frame(0x8, b""));
        let mut scanner = FrameScanner::new();
        for (i, b) in stream.iter().enumerate() {
            let closed = scanner.feed(std::slice::from_ref(b));
            assert_eq!(closed, i == close_at, "byte {i}");
            if closed {
                break;
            }
        }
    }

    #[test]
    fn scanner_ignores_close_opcode_bytes_inside_payload() {
        let mut scanner = FrameScanner::new();
        assert!(!scanner.feed(&masked_frame(0x2, &[0x88, 0x88, 0x88])));
        assert!(!scanner.feed(&masked_frame(0x1, b"still open")));
    }
}
