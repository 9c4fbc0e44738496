//! gRPC message framing.
//!
//! Every message on the wire is prefixed by a one byte compression flag and
//! a big-endian `u32` length:
//!
//! ```text
//!  +------+---------------+-------------------------+
//!  | flag | length (u32)  | message (length bytes)  |
//!  +------+---------------+-------------------------+
//! ```

use std::time::Duration;

use ares_core::Status;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame prefix.
pub const HEADER_LEN: usize = 5;

/// Largest message accepted by default.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Frames one message.
pub fn encode(message: &[u8]) -> Result<Bytes, Status> {
    let len = u32::try_from(message.len())
        .map_err(|_| Status::resource_exhausted("message exceeds the frame size limit"))?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + message.len());
    buf.put_u8(0);
    buf.put_u32(len);
    buf.extend_from_slice(message);
    Ok(buf.freeze())
}

/// Incremental decoder for a stream of framed messages.
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_message_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Decoder {
    /// Creates a decoder rejecting messages larger than `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_message_size,
        }
    }

    /// Appends received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns true when no partial frame is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pops the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Bytes>, Status> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if self.buf[0] != 0 {
            return Err(Status::unimplemented("compressed messages are not supported"));
        }
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        if len > self.max_message_size {
            return Err(Status::resource_exhausted(format!(
                "message of {len} bytes exceeds the {} byte limit",
                self.max_message_size
            )));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

/// Percent-encodes a status message for the `grpc-message` trailer.
#[must_use]
pub fn encode_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Parses a `grpc-timeout` header value such as `250m` or `5S`.
#[must_use]
pub fn parse_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        "M" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ares_core::Code;

    #[test]
    fn test_encode_prefix() {
        let framed = encode(b"abc").unwrap();
        assert_eq!(framed.as_ref(), &[0, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_decode_across_chunks() {
        let mut wire = encode(b"hello").unwrap().to_vec();
        wire.extend_from_slice(&encode(b"").unwrap());
        wire.extend_from_slice(&encode(b"world").unwrap());

        let mut decoder = Decoder::default();
        let mut out = Vec::new();
        for chunk in wire.chunks(3) {
            decoder.push(chunk);
            while let Some(msg) = decoder.next_message().unwrap() {
                out.push(msg);
            }
        }
        assert_eq!(out, vec![Bytes::from("hello"), Bytes::new(), Bytes::from("world")]);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_decode_partial_frame_waits() {
        let mut decoder = Decoder::default();
        decoder.push(&[0, 0, 0, 0, 4, b'a']);
        assert_eq!(decoder.next_message().unwrap(), None);
        assert!(!decoder.is_empty());
    }

    #[test]
    fn test_decode_rejects_compressed_and_oversized() {
        let mut decoder = Decoder::default();
        decoder.push(&[1, 0, 0, 0, 0]);
        assert_eq!(decoder.next_message().unwrap_err().code(), Code::Unimplemented);

        let mut decoder = Decoder::new(2);
        decoder.push(&[0, 0, 0, 0, 3]);
        assert_eq!(decoder.next_message().unwrap_err().code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_encode_message() {
        assert_eq!(encode_message("not found"), "not found");
        assert_eq!(encode_message("100%\n"), "100%25%0A");
        assert_eq!(encode_message("é"), "%C3%A9");
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_timeout("10"), None);
        assert_eq!(parse_timeout("m"), None);
        assert_eq!(parse_timeout("123456789S"), None);
    }
}
