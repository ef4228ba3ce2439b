use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::Client;
use crate::types::events::{
    Event, GroupParticipantsChanged, GroupSubjectChanged, ParticipantChange,
};
use crate::types::Jid;

impl Client {
    /// Every notification is acked (mirroring id, type and participant)
    /// before its typed event goes out.
    pub(crate) async fn handle_notification(&self, node: &Node) {
        let mut attrs = node.attrs();
        let Some(from) = attrs.optional_jid("from") else {
            warn!(target: "Client/Recv", "Notification without sender: {node}");
            return;
        };
        let id = attrs.optional_string("id").unwrap_or_default().to_string();
        let notification_type = attrs.optional_string("type").unwrap_or_default().to_string();
        let participant = attrs.optional_string("participant").map(str::to_string);

        let ack = NodeBuilder::new("ack")
            .attr("to", from.to_string())
            .attr("class", "notification")
            .attr("id", id.clone())
            .attr("type", notification_type.clone())
            .optional_attr("participant", participant.clone())
            .build();
        if let Err(e) = self.send_node(ack).await {
            warn!(target: "Client/Recv", "Could not ack notification {id}: {e}");
        }

        match notification_type.as_str() {
            "subject" => self.handle_subject_notification(node, from),
            "participant" => self.handle_participant_notification(node, from),
            "encrypt" => self.handle_encrypt_notification(node).await,
            "picture" => {
                debug!(target: "Client/Recv", "Picture changed for {from}");
            }
            other => {
                debug!(target: "Client/Recv", "Unhandled notification type '{other}' from {from}");
            }
        }
    }

    fn handle_subject_notification(&self, node: &Node, group: Jid) {
        let Some(body) = node.get_optional_child("body") else {
            warn!(target: "Client/Recv", "Subject notification without body: {node}");
            return;
        };
        let mut attrs = node.attrs();
        let timestamp = attrs
            .optional_u64("t")
            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0));
        let author = attrs.optional_jid("participant");
        self.dispatch_event(Event::GroupSubjectChanged(GroupSubjectChanged {
            group,
            author,
            subject: body.content_string().unwrap_or_default(),
            timestamp,
        }));
    }

    fn handle_participant_notification(&self, node: &Node, group: Jid) {
        let changes = [
            ("add", ParticipantChange::Add),
            ("remove", ParticipantChange::Remove),
            ("promote", ParticipantChange::Promote),
            ("demote", ParticipantChange::Demote),
        ];
        for (tag, change) in changes {
            let Some(child) = node.get_optional_child(tag) else {
                continue;
            };
            let participants: Vec<Jid> = child
                .get_children_by_tag("participant")
                .iter()
                .filter_map(|p| p.attrs().optional_string("jid")?.parse().ok())
                .collect();
            if participants.is_empty() {
                continue;
            }
            self.dispatch_event(Event::GroupParticipantsChanged(GroupParticipantsChanged {
                group: group.clone(),
                change,
                participants,
            }));
        }
    }
}
