use chrono::{DateTime, Utc};
use log::debug;

use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::{Client, ClientError};
use crate::types::events::{Event, PresenceUpdate, Typing};
use crate::types::presence::{ChatState, PresenceType};
use crate::types::Jid;

impl Client {
    /// Announces this client as online, carrying the configured display
    /// name.
    pub(crate) async fn send_available_presence(&self) -> Result<(), ClientError> {
        self.send_presence(PresenceType::Available).await
    }

    pub async fn send_presence(&self, presence: PresenceType) -> Result<(), ClientError> {
        let node = NodeBuilder::new("presence")
            .attr("type", presence.as_str())
            .optional_attr(
                "name",
                (!self.config.username.is_empty()).then(|| self.config.username.clone()),
            )
            .build();
        self.send_node(node).await
    }

    /// Asks the server to relay presence changes for a contact.
    pub async fn subscribe_presence(&self, to: &str) -> Result<(), ClientError> {
        let node = NodeBuilder::new("presence")
            .attr("type", "subscribe")
            .attr("to", Jid::from_msisdn(to).to_string())
            .build();
        self.send_node(node).await
    }

    /// Relays our typing state to a chat.
    pub async fn send_chat_state(&self, to: &str, state: ChatState) -> Result<(), ClientError> {
        let node = NodeBuilder::new("chatstate")
            .attr("to", Jid::from_msisdn(to).to_string())
            .children([NodeBuilder::new(state.as_str()).build()])
            .build();
        self.send_node(node).await
    }

    pub(crate) async fn handle_presence(&self, node: &Node) {
        let mut attrs = node.attrs();
        let Some(from) = attrs.optional_jid("from") else {
            return;
        };
        if &from == self.self_jid() {
            return;
        }

        let available = attrs.optional_string("type") != Some("unavailable");
        let last_seen = attrs
            .optional_u64("last")
            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0));

        debug!(target: "Client/Recv", "Presence from {from}: available={available}");
        self.dispatch_event(Event::Presence(PresenceUpdate {
            from,
            available,
            last_seen,
        }));
    }

    pub(crate) async fn handle_chatstate(&self, node: &Node) {
        let mut attrs = node.attrs();
        let Some(from) = attrs.optional_jid("from") else {
            return;
        };
        let state = if node.get_optional_child("composing").is_some() {
            ChatState::Composing
        } else {
            ChatState::Paused
        };
        self.dispatch_event(Event::Typing(Typing { from, state }));
    }
}
