//! Line-based codec for tokio.
//!
//! The wire unit is a UTF-8 line terminated by `\n` (`\r\n` tolerated).
//! Lines longer than [`MAX_LINE_LEN`] bytes are rejected with a protocol
//! error rather than silently truncated.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, Result};

/// Maximum accepted line length in bytes, terminator included.
pub const MAX_LINE_LEN: usize = 1024;

/// Newline-delimited codec producing one `String` per frame.
pub struct LineCodec {
    /// Index of next byte to check for newline.
    next_index: usize,
    /// Maximum line length.
    max_len: usize,
}

impl LineCodec {
    /// Create a codec with the protocol default line limit.
    pub fn new() -> Self {
        Self {
            next_index: 0,
            max_len: MAX_LINE_LEN,
        }
    }

    /// Create a codec with a custom line limit.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        // Look for newline starting from where we left off
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if line.len() > self.max_len {
                return Err(ProtocolError::LineTooLong {
                    actual: line.len(),
                    limit: self.max_len,
                });
            }

            let text = std::str::from_utf8(&line)
                .map_err(|e| ProtocolError::InvalidUtf8 {
                    byte_pos: e.valid_up_to(),
                })?
                .trim_end_matches(['\r', '\n']);

            Ok(Some(text.to_string()))
        } else {
            // No complete line yet - remember where we stopped
            self.next_index = src.len();

            if src.len() > self.max_len {
                return Err(ProtocolError::LineTooLong {
                    actual: src.len(),
                    limit: self.max_len,
                });
            }
            Ok(None)
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&str>::encode(self, item.as_str(), dst)
    }
}

impl<'a> Encoder<&'a str> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, bytes: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Ok(Some(line)) = codec.decode(&mut buf) {
            out.push(line);
        }
        out
    }

    #[test]
    fn decodes_lf_and_crlf() {
        let mut codec = LineCodec::new();
        let lines = decode_all(&mut codec, b"PING\r\nEXIT quitting\n");
        assert_eq!(lines, vec!["PING".to_string(), "EXIT quitting".to_string()]);
    }

    #[test]
    fn partial_line_is_buffered() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"LOGIN al"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ice pass\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "LOGIN alice pass");
    }

    #[test]
    fn oversized_line_is_rejected() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'a'; MAX_LINE_LEN + 1]);
        buf.put_u8(b'\n');
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn oversized_partial_is_rejected_early() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&vec![b'a'; MAX_LINE_LEN + 100][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"SAY main \xff\xfe\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("ACCEPTED alice", &mut buf).unwrap();
        assert_eq!(&buf[..], b"ACCEPTED alice\n");
    }
}
