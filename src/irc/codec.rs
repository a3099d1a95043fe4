//! IRC line codec — frames a TCP byte stream into IRC messages.
//!
//! Accepts `\r\n`- or bare-`\n`-terminated lines on input, parses each
//! into a [`Message`], and serializes outgoing messages with `\r\n`
//! termination.
//!
//! Oversized lines (> 512 bytes) are skipped rather than killing the
//! connection.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::message::{Message, ParseError};

/// Maximum line length (including the terminator), per RFC 1459.
const MAX_LINE_LENGTH: usize = 512;

/// Codec error: either a protocol parse failure or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames IRC messages on line boundaries.
///
/// Oversized lines are skipped (logged + discarded) instead of returning
/// a fatal error.
#[derive(Debug, Default)]
pub struct IrcCodec {
    /// True when we're discarding an oversized line and waiting for its
    /// terminator.
    skipping: bool,
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // If we're in skip mode (discarding an oversized line that
            // didn't have its terminator yet), scan for the terminator.
            if self.skipping {
                if let Some(pos) = src.iter().position(|&b| b == b'\n') {
                    warn!(bytes = pos + 1, "codec: finished skipping oversized line tail");
                    src.advance(pos + 1);
                    self.skipping = false;
                    // Fall through and try the next line.
                } else {
                    src.clear();
                    return Ok(None);
                }
            }

            let lf_pos = src.iter().position(|&b| b == b'\n');

            match lf_pos {
                Some(pos) if pos > MAX_LINE_LENGTH => {
                    // Complete oversized line — skip it entirely.
                    warn!(bytes = pos, "codec: skipped oversized IRC line");
                    src.advance(pos + 1);
                    continue;
                }
                Some(pos) => {
                    // Normal line — extract, trim the optional `\r`, parse.
                    let mut line_bytes = src.split_to(pos);
                    src.advance(1); // skip \n
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let line = std::str::from_utf8(&line_bytes)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

                    // Blank lines between messages are tolerated.
                    if line.is_empty() {
                        continue;
                    }

                    return Ok(Some(Message::parse(line)?));
                }
                None => {
                    // No complete line yet. Check if the buffer is
                    // already past the limit.
                    if src.len() > MAX_LINE_LENGTH {
                        warn!(
                            bytes = src.len(),
                            "codec: discarding oversized partial line, waiting for terminator"
                        );
                        src.clear();
                        self.skipping = true;
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    // ── Decoder ──────────────────────────────────────────────────

    #[test]
    fn decode_complete_line() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::from("NICK wings\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.args, vec!["wings"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_bare_lf_line() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::from("NICK wings\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.args, vec!["wings"]);
    }

    #[test]
    fn decode_partial_line_then_complete() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::from("NICK wi");

        // Not enough data yet.
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // More data arrives.
        buf.extend_from_slice(b"ngs\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.args, vec!["wings"]);
    }

    #[test]
    fn decode_two_messages_in_one_read() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::from("NICK wings\r\nUSER wings 0 * :Wings\n");

        let msg1 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg1.command, "NICK");

        let msg2 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg2.command, "USER");
        assert_eq!(msg2.args, vec!["wings", "0", "*", "Wings"]);

        assert!(buf.is_empty());
    }

    #[test]
    fn decode_message_with_prefix() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::from(":wings!user@host PRIVMSG #shoal :Hello everyone!\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("wings!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#shoal", "Hello everyone!"]);
    }

    #[test]
    fn decode_skips_oversized_line_and_continues() {
        let mut codec = IrcCodec::default();
        // Oversized line followed by a valid line.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'A'; MAX_LINE_LENGTH + 100]);
        buf.extend_from_slice(b"\r\nNICK wings\r\n");

        // First decode should skip the oversized line and return the
        // valid one.
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.args, vec!["wings"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_skips_oversized_partial_then_completes() {
        let mut codec = IrcCodec::default();
        // Oversized partial line (no terminator yet).
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 100].as_slice());

        // Should return None and enter skip mode.
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.skipping);
        assert!(buf.is_empty());

        // More data arrives with the terminator and a valid message.
        buf.extend_from_slice(b"more garbage\r\nNICK wings\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert!(!codec.skipping);
    }

    #[test]
    fn decode_empty_buffer() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    // ── Encoder ──────────────────────────────────────────────────

    #[test]
    fn encode_appends_crlf() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::new();
        let msg = Message::new(None, "NICK", &["wings"]);
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(&buf[..], b"NICK :wings\r\n");
    }

    #[test]
    fn encode_with_prefix() {
        let mut codec = IrcCodec::default();
        let mut buf = BytesMut::new();
        let msg = Message::new(Some("shoal.local"), "001", &["wings", "Welcome to Shoal"]);
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(&buf[..], b":shoal.local 001 wings :Welcome to Shoal\r\n");
    }

    // ── Roundtrip through codec ──────────────────────────────────

    #[test]
    fn roundtrip_through_codec() {
        let mut codec = IrcCodec::default();

        let original = Message::new(Some("wings!user@host"), "PRIVMSG", &["#shoal", "Hello!"]);
        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }
}
