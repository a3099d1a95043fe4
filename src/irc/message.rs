//! IRC message parsing and serialization.
//!
//! Implements RFC 1459 message format with TS6 prefixes:
//!   [`:`prefix SPACE] command [SPACE args] [SPACE `:` trailing]
//!
//! On top of the wire fields, a message carries the routing state the core
//! binds to it: `sender_id` (the UID or SID of the connection it arrived
//! on) and `dest_ids` (the UIDs or SIDs it should be delivered to). Both
//! are empty on a freshly parsed message.
use std::fmt;

/// The internal deletion token. It rides the `ToClient` queue so that
/// user-record removal is ordered after any still-queued messages for
/// those users. It is never written to a socket; the managers refuse it.
pub const INT_DELUSER: &str = "INT_DELUSER";

/// A parsed IRC message plus the core's routing state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Optional prefix (server name, `nick!user@host`, UID, or SID).
    pub prefix: Option<String>,
    /// The command (e.g. `PRIVMSG`, `001`, `SQUIT`).
    pub command: String,
    /// Arguments — the last may have been a trailing arg (with spaces).
    pub args: Vec<String>,
    /// The UID/SID the core has bound this message to as its source.
    pub sender_id: String,
    /// The UIDs/SIDs the core has chosen as recipients.
    pub dest_ids: Vec<String>,
}

/// Errors that can occur during message parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    /// Build an unrouted wire message.
    pub fn new(prefix: Option<&str>, command: &str, args: &[&str]) -> Self {
        Message {
            prefix: prefix.map(str::to_owned),
            command: command.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            sender_id: String::new(),
            dest_ids: Vec::new(),
        }
    }

    /// Set the destination set, consuming self. Reads naturally at the
    /// end of a builder chain when a handler enqueues a message.
    pub fn to(mut self, dest_ids: Vec<String>) -> Self {
        self.dest_ids = dest_ids;
        self
    }

    /// An independent copy, safe to mutate per-recipient. Required before
    /// any per-recipient rewriting of an enqueued message.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Parse a single IRC message from a line (without the terminator).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = if let Some(stripped) = input.strip_prefix(':') {
            // Prefix runs until the first space.
            match stripped.find(' ') {
                Some(idx) => (Some(stripped[..idx].to_owned()), &stripped[idx + 1..]),
                None => return Err(ParseError::MissingCommand),
            }
        } else {
            (None, input)
        };

        // Split into command and argument portion.
        let (command, arg_str) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut args = Vec::new();

        if let Some(mut remaining) = arg_str {
            while !remaining.is_empty() {
                if let Some(trailing) = remaining.strip_prefix(':') {
                    // Trailing argument: everything after the colon,
                    // including spaces.
                    args.push(trailing.to_owned());
                    break;
                }
                match remaining.find(' ') {
                    Some(idx) => {
                        args.push(remaining[..idx].to_owned());
                        remaining = &remaining[idx + 1..];
                    }
                    None => {
                        args.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            args,
            sender_id: String::new(),
            dest_ids: Vec::new(),
        })
    }

    /// Serialize to the IRC wire format (without trailing `\r\n`).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if !self.args.is_empty() {
            let last_idx = self.args.len() - 1;
            for (i, arg) in self.args.iter().enumerate() {
                out.push(' ');
                if i == last_idx {
                    // Always prefix the last argument with `:`. Valid per
                    // RFC 1459, and keeps emitted lines byte-stable under
                    // reparse.
                    out.push(':');
                }
                out.push_str(arg);
            }
        }

        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Parsing basics ───────────────────────────────────────────

    #[test]
    fn parse_simple_command() {
        let msg = Message::parse("QUIT").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "QUIT");
        assert_eq!(msg.args, Vec::<String>::new());
        assert_eq!(msg.sender_id, "");
        assert!(msg.dest_ids.is_empty());
    }

    #[test]
    fn parse_command_with_one_arg() {
        let msg = Message::parse("NICK wings").unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.args, vec!["wings"]);
    }

    #[test]
    fn parse_command_with_trailing() {
        let msg = Message::parse("PRIVMSG #shoal :Hello everyone!").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#shoal", "Hello everyone!"]);
    }

    #[test]
    fn parse_with_prefix() {
        let msg = Message::parse(":wings!user@host PRIVMSG #shoal :hey friends").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("wings!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#shoal", "hey friends"]);
    }

    #[test]
    fn parse_ts6_pass() {
        let msg = Message::parse("PASS sekrit TS 6 :2BB").unwrap();
        assert_eq!(msg.command, "PASS");
        assert_eq!(msg.args, vec!["sekrit", "TS", "6", "2BB"]);
    }

    #[test]
    fn parse_sid_prefix() {
        let msg = Message::parse(":1AA SQUIT 2BB :gone").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("1AA"));
        assert_eq!(msg.args, vec!["2BB", "gone"]);
    }

    #[test]
    fn parse_numeric_reply() {
        let msg = Message::parse(":shoal.local 001 wings :Welcome").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("shoal.local"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.args, vec!["wings", "Welcome"]);
    }

    #[test]
    fn parse_strips_terminators() {
        let msg = Message::parse("PING :server\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.args, vec!["server"]);
        let msg = Message::parse("PING :server\n").unwrap();
        assert_eq!(msg.args, vec!["server"]);
    }

    // ── Parsing edge cases ───────────────────────────────────────

    #[test]
    fn parse_trailing_empty_string() {
        let msg = Message::parse("TOPIC #shoal :").unwrap();
        assert_eq!(msg.args, vec!["#shoal", ""]);
    }

    #[test]
    fn parse_trailing_starts_with_colon() {
        let msg = Message::parse("PRIVMSG #shoal ::)").unwrap();
        assert_eq!(msg.args, vec!["#shoal", ":)"]);
    }

    #[test]
    fn parse_multiple_middle_args() {
        let msg = Message::parse("MODE #shoal +o wings").unwrap();
        assert_eq!(msg.command, "MODE");
        assert_eq!(msg.args, vec!["#shoal", "+o", "wings"]);
    }

    // ── Parse errors ─────────────────────────────────────────────

    #[test]
    fn parse_empty_input() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
    }

    #[test]
    fn parse_prefix_only() {
        assert_eq!(
            Message::parse(":prefix_only"),
            Err(ParseError::MissingCommand)
        );
    }

    // ── Serialization ────────────────────────────────────────────

    #[test]
    fn serialize_simple() {
        let msg = Message::new(None, "QUIT", &[]);
        assert_eq!(msg.to_wire(), "QUIT");
    }

    #[test]
    fn serialize_with_trailing() {
        let msg = Message::new(None, "PRIVMSG", &["#shoal", "Hello everyone!"]);
        assert_eq!(msg.to_wire(), "PRIVMSG #shoal :Hello everyone!");
    }

    #[test]
    fn serialize_with_prefix() {
        let msg = Message::new(Some("wings!user@host"), "PRIVMSG", &["#shoal", "hey"]);
        assert_eq!(msg.to_wire(), ":wings!user@host PRIVMSG #shoal :hey");
    }

    #[test]
    fn serialize_empty_trailing() {
        let msg = Message::new(None, "TOPIC", &["#shoal", ""]);
        assert_eq!(msg.to_wire(), "TOPIC #shoal :");
    }

    // ── Roundtrip ────────────────────────────────────────────────

    #[test]
    fn roundtrip_emitted_lines_are_byte_stable() {
        // Everything the core emits puts `:` on the last argument, so
        // reparse-then-serialize is the identity on emitted lines.
        for line in [
            "PONG shoal.local :12345",
            ":1AAAAAA00 PRIVMSG #shoal :hi there",
            ":shoal.local 422 wings :MOTD File is missing",
            "PASS sekrit TS 6 :1AA",
            ":1AA SJOIN 1700000000 #shoal + :1AAAAAA00 2BBAAAAAA",
        ] {
            let msg = Message::parse(line).unwrap();
            assert_eq!(msg.to_wire(), line);
        }
    }

    #[test]
    fn dup_is_independent() {
        let msg = Message::new(Some("*"), "MODE", &["*", "+i"]).to(vec!["1AAAAAA00".into()]);
        let mut copy = msg.dup();
        copy.args[0] = "wings".into();
        copy.prefix = Some("wings".into());
        assert_eq!(msg.args[0], "*");
        assert_eq!(msg.prefix.as_deref(), Some("*"));
    }
}
