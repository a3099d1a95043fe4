//! Identifier shapes: UIDs, SIDs, nicks, channel and server names.
//!
//! The first three characters of any UID or SID name the server that owns
//! it; that prefix is the sole mechanism for local/remote classification.

/// Length of a server ID.
pub const SID_LEN: usize = 3;
/// Length of a user ID (SID prefix + 6-character suffix).
pub const UID_LEN: usize = 9;

/// Visible hostname stand-in. Resolving the client's real host is out of
/// scope; every hostmask the core emits uses this.
pub const HOST_PLACEHOLDER: &str = "some.host";

/// True if `id` has the shape of a TS6 user ID: nine characters, the
/// first being the digit that starts the issuing server's SID.
pub fn is_uid(id: &str) -> bool {
    id.len() == UID_LEN && id.as_bytes()[0].is_ascii_digit()
}

/// True if `id` is a well-formed SID: `[0-9][0-9A-Z]{2}`.
pub fn valid_sid(id: &str) -> bool {
    let b = id.as_bytes();
    b.len() == SID_LEN
        && b[0].is_ascii_digit()
        && b[1..]
            .iter()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

/// The SID that owns `id` (a UID or SID). Callers must have checked the
/// length; a short ID here is a protocol bug upstream.
pub fn owning_sid(id: &str) -> &str {
    &id[..SID_LEN]
}

/// Normalize for case-insensitive comparison (CASEMAPPING=ascii).
pub fn irc_lower(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Nick shape: a letter or special to start, then letters, digits,
/// specials, or `-`. Specials per RFC 2812: `[ ] \ ` _ ^ { | }`.
pub fn valid_nick(nick: &str) -> bool {
    fn special(c: char) -> bool {
        matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}')
    }
    let mut chars = nick.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || special(c) => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || special(c) || c == '-')
}

/// Channel shape: `#` or `&` sigil, then at least one character, none of
/// which may be a space, comma, or BEL.
pub fn valid_channel(name: &str) -> bool {
    let mut chars = name.chars();
    if !matches!(chars.next(), Some('#' | '&')) {
        return false;
    }
    let mut seen = false;
    for c in chars {
        if matches!(c, ' ' | ',' | '\u{7}') {
            return false;
        }
        seen = true;
    }
    seen
}

/// Server-name shape: word characters in at least two dot-separated
/// labels (`\w+(\.\w+)+`).
pub fn valid_server_name(name: &str) -> bool {
    let labels: Vec<&str> = name.split('.').collect();
    labels.len() >= 2
        && labels
            .iter()
            .all(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}
