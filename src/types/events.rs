use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::binary::node::Node;
use crate::types::message::{LocationMessage, MediaMessage, TextMessage, VcardMessage};
use crate::types::presence::ChatState;
use crate::types::Jid;

#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub jid: Jid,
}

#[derive(Debug, Clone)]
pub struct LoginFailure {
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Disconnected {
    pub reconnecting: bool,
}

#[derive(Debug, Clone)]
pub struct StreamError {
    pub code: String,
    pub raw: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct Typing {
    pub from: Jid,
    pub state: ChatState,
}

#[derive(Debug, Clone)]
pub struct PresenceUpdate {
    pub from: Jid,
    pub available: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// The recipient's client acknowledged these message ids.
#[derive(Debug, Clone)]
pub struct ClientReceived {
    pub from: Jid,
    pub message_ids: Vec<String>,
    pub read: bool,
}

/// The server acknowledged an outbound node.
#[derive(Debug, Clone)]
pub struct ServerAck {
    pub id: String,
    pub class: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroupSubjectChanged {
    pub group: Jid,
    pub author: Option<Jid>,
    pub subject: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Add,
    Remove,
    Promote,
    Demote,
}

#[derive(Debug, Clone)]
pub struct GroupParticipantsChanged {
    pub group: Jid,
    pub change: ParticipantChange,
    pub participants: Vec<Jid>,
}

#[derive(Debug, Clone)]
pub struct GroupList {
    pub groups: Vec<crate::groups::GroupInfo>,
}

#[derive(Debug, Clone)]
pub struct ProfilePicture {
    pub from: Jid,
    pub picture_id: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub jid: Jid,
    pub status: String,
    pub set_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StatusReceived {
    pub statuses: Vec<StatusEntry>,
}

#[derive(Debug, Clone)]
pub struct MediaUploadFailed {
    pub to: Jid,
    pub filepath: String,
    pub reason: String,
}

/// Server had no pre-keys for the recipient; the pending messages were
/// delivered unencrypted.
#[derive(Debug, Clone)]
pub struct EncryptionUnavailable {
    pub jid: Jid,
}

#[derive(Debug, Clone)]
pub enum Event {
    Connected,
    LoggedIn(LoggedIn),
    LoginFailure(LoginFailure),
    Disconnected(Disconnected),
    StreamError(StreamError),

    Text(TextMessage),
    Location(LocationMessage),
    Media(MediaMessage),
    Vcard(VcardMessage),

    Typing(Typing),
    Presence(PresenceUpdate),
    ClientReceived(ClientReceived),
    ServerAck(ServerAck),

    GroupSubjectChanged(GroupSubjectChanged),
    GroupParticipantsChanged(GroupParticipantsChanged),
    GroupList(GroupList),

    ProfilePicture(ProfilePicture),
    StatusReceived(StatusReceived),

    MediaUploadFailed(MediaUploadFailed),
    EncryptionUnavailable(EncryptionUnavailable),
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

impl<F: Fn(&Event) + Send + Sync> EventHandler for F {
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}

/// Fans events out to registered handlers, synchronously and in
/// registration order.
#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_reaches_all_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            bus.add_handler(Arc::new(move |_event: &Event| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        bus.dispatch(&Event::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
