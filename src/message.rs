use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::Client;
use crate::types::events::{Event, Typing};
use crate::types::message::{
    LocationMessage, MediaKind, MediaMessage, MessageInfo, TextMessage, VcardMessage,
};
use crate::types::presence::ChatState;
use crate::types::Jid;

/// A typed view of one inbound `message` node.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Text(TextMessage),
    Location(LocationMessage),
    Media(MediaMessage),
    Vcard(VcardMessage),
}

/// The matcher kinds, tried in declaration order; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matcher {
    Text,
    Location,
    Image,
    Video,
    Audio,
    Vcard,
}

impl Matcher {
    fn matches(&self, node: &Node) -> bool {
        let media_type = node
            .get_optional_child("media")
            .and_then(|m| m.attrs().optional_string("type"));
        match self {
            Matcher::Text => node.get_optional_child("body").is_some(),
            Matcher::Location => media_type == Some("location"),
            Matcher::Image => media_type == Some("image"),
            Matcher::Video => media_type == Some("video"),
            Matcher::Audio => media_type == Some("audio"),
            Matcher::Vcard => media_type == Some("vcard"),
        }
    }

    fn process(&self, node: &Node, info: MessageInfo) -> Option<MessageEvent> {
        match self {
            Matcher::Text => {
                let body = node.get_optional_child("body")?.content_string()?;
                Some(MessageEvent::Text(TextMessage { info, body }))
            }
            Matcher::Location => {
                let media = node.get_optional_child("media")?;
                let attrs = media.attrs();
                let latitude = attrs.optional_string("latitude")?.parse().ok()?;
                let longitude = attrs.optional_string("longitude")?.parse().ok()?;
                Some(MessageEvent::Location(LocationMessage {
                    info,
                    latitude,
                    longitude,
                    name: attrs.optional_string("name").map(str::to_string),
                    url: attrs.optional_string("url").map(str::to_string),
                    thumbnail: media.bytes().map(<[u8]>::to_vec).unwrap_or_default(),
                }))
            }
            Matcher::Image | Matcher::Video | Matcher::Audio => {
                let media = node.get_optional_child("media")?;
                let mut attrs = media.attrs();
                let kind = MediaKind::from_str(attrs.optional_string("type")?)?;
                Some(MessageEvent::Media(MediaMessage {
                    info,
                    kind,
                    url: attrs.optional_string("url").unwrap_or_default().to_string(),
                    size: attrs.optional_u64("size").unwrap_or(0),
                    file: attrs.optional_string("file").unwrap_or_default().to_string(),
                    encoding: attrs.optional_string("encoding").map(str::to_string),
                    ip: attrs.optional_string("ip").map(str::to_string),
                    mimetype: attrs.optional_string("mimetype").map(str::to_string),
                    filehash: attrs.optional_string("filehash").map(str::to_string),
                    width: attrs.optional_u64("width").map(|v| v as u32),
                    height: attrs.optional_u64("height").map(|v| v as u32),
                    duration: attrs.optional_u64("duration").map(|v| v as u32),
                    codecs: attrs.optional_string("codecs").map(str::to_string),
                    thumbnail: media.bytes().map(<[u8]>::to_vec).unwrap_or_default(),
                    caption: attrs.optional_string("caption").map(str::to_string),
                }))
            }
            Matcher::Vcard => {
                let vcard = node.get_optional_child_by_tag(&["media", "vcard"])?;
                Some(MessageEvent::Vcard(VcardMessage {
                    info,
                    name: vcard
                        .attrs()
                        .optional_string("name")
                        .unwrap_or_default()
                        .to_string(),
                    vcard: vcard.bytes().map(<[u8]>::to_vec).unwrap_or_default(),
                }))
            }
        }
    }
}

/// Ordered matcher list over inbound message nodes. Messages matching no
/// matcher are silently discarded; they were already handled at the
/// dispatch level.
pub struct MessageProcessor {
    matchers: Vec<Matcher>,
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageProcessor {
    pub fn new() -> Self {
        Self {
            matchers: vec![
                Matcher::Text,
                Matcher::Location,
                Matcher::Image,
                Matcher::Video,
                Matcher::Audio,
                Matcher::Vcard,
            ],
        }
    }

    pub fn process(&self, node: &Node, info: MessageInfo) -> Option<MessageEvent> {
        self.matchers
            .iter()
            .find(|m| m.matches(node))
            .and_then(|m| m.process(node, info))
    }
}

/// Extracts the shared envelope fields from a message node.
pub(crate) fn parse_message_info(node: &Node) -> Option<MessageInfo> {
    let mut attrs = node.attrs();
    let from = attrs.optional_jid("from")?;
    let id = attrs.optional_string("id")?.to_string();
    let timestamp = attrs
        .optional_u64("t")
        .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0))
        .unwrap_or_else(Utc::now);
    let author = attrs.optional_jid("participant");
    Some(MessageInfo {
        from,
        id,
        timestamp,
        notify: attrs.optional_string("notify").map(str::to_string),
        author,
    })
}

impl Client {
    pub(crate) async fn handle_message(&self, node: Node) {
        let Some(info) = parse_message_info(&node) else {
            warn!(target: "Client/Recv", "Message without routable envelope: {node}");
            return;
        };

        if &info.from == self.self_jid() {
            debug!(target: "Client/Recv", "Ignoring echo of own message {}", info.id);
            return;
        }

        // The read receipt always goes out before anything user-visible.
        if let Err(e) = self.send_read_receipt(&info.from, &info.id).await {
            warn!(target: "Client/Recv", "Could not send receipt for {}: {e}", info.id);
        }

        if let Some(enc) = node.get_optional_child("enc") {
            self.handle_encrypted_message(&info, enc).await;
            return;
        }

        let Some(event) = self.message_processor.process(&node, info) else {
            debug!(target: "Client/Recv", "Discarding unmatched message: {node}");
            return;
        };

        // A delivered text implies its author stopped typing.
        if let MessageEvent::Text(ref text) = event {
            self.dispatch_event(Event::Typing(Typing {
                from: text.info.author.clone().unwrap_or_else(|| text.info.from.clone()),
                state: ChatState::Paused,
            }));
        }

        self.dispatch_event(match event {
            MessageEvent::Text(m) => Event::Text(m),
            MessageEvent::Location(m) => Event::Location(m),
            MessageEvent::Media(m) => Event::Media(m),
            MessageEvent::Vcard(m) => Event::Vcard(m),
        });
    }

    pub(crate) async fn send_read_receipt(
        &self,
        to: &Jid,
        id: &str,
    ) -> Result<(), crate::client::ClientError> {
        let receipt = NodeBuilder::new("receipt")
            .attr("to", to.to_string())
            .attr("id", id)
            .attr("type", "read")
            .attr("t", Utc::now().timestamp().to_string())
            .build();
        self.send_node(receipt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> MessageInfo {
        MessageInfo {
            from: "31000000000@s.whatsapp.net".parse().unwrap(),
            id: "abc".to_string(),
            timestamp: Utc::now(),
            notify: Some("Bob".to_string()),
            author: None,
        }
    }

    fn message_with(children: Vec<Node>) -> Node {
        NodeBuilder::new("message")
            .attr("from", "31000000000@s.whatsapp.net")
            .attr("id", "abc")
            .attr("type", "text")
            .children(children)
            .build()
    }

    #[test]
    fn test_text_matcher() {
        let processor = MessageProcessor::new();
        let node = message_with(vec![NodeBuilder::new("body")
            .bytes(b"hi".to_vec())
            .build()]);
        match processor.process(&node, info()) {
            Some(MessageEvent::Text(text)) => assert_eq!(text.body, "hi"),
            other => panic!("expected text event, got {other:?}"),
        }
    }

    #[test]
    fn test_location_matcher() {
        let processor = MessageProcessor::new();
        let node = message_with(vec![NodeBuilder::new("media")
            .attr("type", "location")
            .attr("latitude", "52.5200")
            .attr("longitude", "13.4050")
            .attr("name", "Berlin")
            .bytes(vec![0xFF, 0xD8])
            .build()]);
        match processor.process(&node, info()) {
            Some(MessageEvent::Location(loc)) => {
                assert!((loc.latitude - 52.52).abs() < 1e-9);
                assert_eq!(loc.name.as_deref(), Some("Berlin"));
                assert_eq!(loc.thumbnail, vec![0xFF, 0xD8]);
            }
            other => panic!("expected location event, got {other:?}"),
        }
    }

    #[test]
    fn test_image_signaled_by_media_child_type() {
        let processor = MessageProcessor::new();
        let node = message_with(vec![NodeBuilder::new("media")
            .attr("type", "image")
            .attr("url", "https://mms.example/img.jpg")
            .attr("size", "1024")
            .attr("width", "640")
            .attr("height", "480")
            .attr("caption", "sunset")
            .build()]);
        match processor.process(&node, info()) {
            Some(MessageEvent::Media(media)) => {
                assert_eq!(media.kind, MediaKind::Image);
                assert_eq!(media.size, 1024);
                assert_eq!(media.width, Some(640));
                assert_eq!(media.caption.as_deref(), Some("sunset"));
            }
            other => panic!("expected media event, got {other:?}"),
        }
    }

    #[test]
    fn test_vcard_matcher() {
        let processor = MessageProcessor::new();
        let node = message_with(vec![NodeBuilder::new("media")
            .attr("type", "vcard")
            .children([NodeBuilder::new("vcard")
                .attr("name", "Alice")
                .bytes(b"BEGIN:VCARD".to_vec())
                .build()])
            .build()]);
        match processor.process(&node, info()) {
            Some(MessageEvent::Vcard(vcard)) => {
                assert_eq!(vcard.name, "Alice");
                assert_eq!(vcard.vcard, b"BEGIN:VCARD");
            }
            other => panic!("expected vcard event, got {other:?}"),
        }
    }

    #[test]
    fn test_exactly_one_matcher_fires() {
        let processor = MessageProcessor::new();
        // Both a body and an image media child: text is first in order.
        let node = message_with(vec![
            NodeBuilder::new("body").bytes(b"caption text".to_vec()).build(),
            NodeBuilder::new("media").attr("type", "image").build(),
        ]);
        assert!(matches!(
            processor.process(&node, info()),
            Some(MessageEvent::Text(_))
        ));
    }

    #[test]
    fn test_unmatched_message_is_discarded() {
        let processor = MessageProcessor::new();
        let node = message_with(vec![NodeBuilder::new("unknown-child").build()]);
        assert!(processor.process(&node, info()).is_none());
    }
}
