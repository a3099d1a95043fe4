//! The numeric-reply catalog.
//!
//! A [`Numeric`] is both a typed error (registry operations return it) and
//! a renderable wire reply. Rendering produces a [`Message`] whose first
//! argument is the `"*"` placeholder; the client manager personalises it
//! to the recipient's nick at delivery time.
use std::fmt;

use super::message::Message;

/// Every numeric the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    RplWelcome,
    RplYourHost,
    RplNamReply,
    ErrNoSuchNick,
    ErrNoSuchChannel,
    ErrNoMotd,
    ErrErroneusNickname,
    ErrNicknameInUse,
    ErrNotOnChannel,
    ErrUserOnChannel,
    ErrNeedMoreParams,
    ErrAlreadyRegistred,
}

pub use Code::*;

impl Code {
    /// The three-digit command token.
    pub fn digits(self) -> &'static str {
        match self {
            RplWelcome => "001",
            RplYourHost => "002",
            RplNamReply => "353",
            ErrNoSuchNick => "401",
            ErrNoSuchChannel => "403",
            ErrNoMotd => "422",
            ErrErroneusNickname => "432",
            ErrNicknameInUse => "433",
            ErrNotOnChannel => "442",
            ErrUserOnChannel => "443",
            ErrNeedMoreParams => "461",
            ErrAlreadyRegistred => "462",
        }
    }

    /// The RFC name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            RplWelcome => "RPL_WELCOME",
            RplYourHost => "RPL_YOURHOST",
            RplNamReply => "RPL_NAMREPLY",
            ErrNoSuchNick => "ERR_NOSUCHNICK",
            ErrNoSuchChannel => "ERR_NOSUCHCHANNEL",
            ErrNoMotd => "ERR_NOMOTD",
            ErrErroneusNickname => "ERR_ERRONEUSNICKNAME",
            ErrNicknameInUse => "ERR_NICKNAMEINUSE",
            ErrNotOnChannel => "ERR_NOTONCHANNEL",
            ErrUserOnChannel => "ERR_USERONCHANNEL",
            ErrNeedMoreParams => "ERR_NEEDMOREPARAMS",
            ErrAlreadyRegistred => "ERR_ALREADYREGISTRED",
        }
    }

    /// The default trailing text.
    fn text(self) -> &'static str {
        match self {
            RplWelcome => "Welcome to the Internet Relay Network",
            RplYourHost => "Your host is running an IRC server",
            RplNamReply => "",
            ErrNoSuchNick => "No such nick/channel",
            ErrNoSuchChannel => "No such channel",
            ErrNoMotd => "MOTD File is missing",
            ErrErroneusNickname => "Erroneous nickname",
            ErrNicknameInUse => "Nickname is already in use",
            ErrNotOnChannel => "You're not on that channel",
            ErrUserOnChannel => "is already on channel",
            ErrNeedMoreParams => "Not enough parameters",
            ErrAlreadyRegistred => "Unauthorized command (already registered)",
        }
    }
}

/// A numeric reply bound to its interpolated parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numeric {
    pub code: Code,
    pub params: Vec<String>,
}

impl Numeric {
    pub fn new(code: Code) -> Self {
        Numeric {
            code,
            params: Vec::new(),
        }
    }

    pub fn with(code: Code, params: &[&str]) -> Self {
        Numeric {
            code,
            params: params.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    /// Render as an unrouted message: `<digits> * <params...> :<text>`.
    /// The `"*"` is personalised per-recipient by the client manager.
    pub fn message(&self) -> Message {
        let mut args = Vec::with_capacity(self.params.len() + 2);
        args.push("*".to_owned());
        args.extend(self.params.iter().cloned());
        args.push(self.code.text().to_owned());
        Message {
            prefix: None,
            command: self.code.digits().to_owned(),
            args,
            sender_id: String::new(),
            dest_ids: Vec::new(),
        }
    }

    /// Render with a destination already bound.
    pub fn message_for(&self, dest: &str) -> Message {
        self.message().to(vec![dest.to_owned()])
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.code.name())
        } else {
            write!(f, "{} {}", self.code.name(), self.params.join(" "))
        }
    }
}

impl std::error::Error for Numeric {}
