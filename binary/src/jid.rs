use std::fmt;
use std::str::FromStr;

use crate::consts::{BROADCAST_SERVER, DEFAULT_USER_SERVER, GROUP_SERVER};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JidError {
    InvalidFormat(String),
}

impl fmt::Display for JidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JidError::InvalidFormat(s) => write!(f, "invalid JID: {s}"),
        }
    }
}

impl std::error::Error for JidError {}

/// An addressable identifier: `<digits>@s.whatsapp.net` for users,
/// `<digits>-<digits>@g.us` for groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Builds a user JID from a bare MSISDN, passing full JIDs through.
    pub fn from_msisdn(input: &str) -> Self {
        if input.contains('@') {
            input.parse().unwrap_or_else(|_| Jid::new(input, DEFAULT_USER_SERVER))
        } else {
            Jid::new(input, DEFAULT_USER_SERVER)
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(id, GROUP_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.server.is_empty()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((user, server)) if !server.is_empty() => Ok(Jid::new(user, server)),
            _ => Err(JidError::InvalidFormat(s.to_string())),
        }
    }
}
