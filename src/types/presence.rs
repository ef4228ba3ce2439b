/// Typing state relayed through `chatstate` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Composing,
    Paused,
}

impl ChatState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatState::Composing => "composing",
            ChatState::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Available,
    Unavailable,
}

impl PresenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceType::Available => "available",
            PresenceType::Unavailable => "unavailable",
        }
    }
}
