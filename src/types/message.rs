use chrono::{DateTime, Utc};

use crate::types::Jid;

/// Envelope shared by every inbound message kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInfo {
    pub from: Jid,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Sender display name, when the server relays one.
    pub notify: Option<String>,
    /// The actual sender inside a group chat.
    pub author: Option<Jid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub info: MessageInfo,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationMessage {
    pub info: MessageInfo,
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub url: Option<String>,
    pub thumbnail: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaMessage {
    pub info: MessageInfo,
    pub kind: MediaKind,
    pub url: String,
    pub size: u64,
    pub file: String,
    pub encoding: Option<String>,
    pub ip: Option<String>,
    pub mimetype: Option<String>,
    pub filehash: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<u32>,
    pub codecs: Option<String>,
    pub thumbnail: Vec<u8>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VcardMessage {
    pub info: MessageInfo,
    pub name: String,
    pub vcard: Vec<u8>,
}
