use log::{debug, warn};

use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::Client;
use crate::types::events::{ClientReceived, Event};

impl Client {
    /// A client-side receipt: the peer's device acknowledged one or more of
    /// our messages. Ack it, then surface every covered id.
    pub(crate) async fn handle_receipt(&self, node: &Node) {
        let mut attrs = node.attrs();
        let Some(from) = attrs.optional_jid("from") else {
            warn!(target: "Client/Recv", "Receipt without sender: {node}");
            return;
        };
        let Some(id) = attrs.optional_string("id").map(str::to_string) else {
            warn!(target: "Client/Recv", "Receipt without id: {node}");
            return;
        };
        let receipt_type = attrs.optional_string("type");
        let read = receipt_type == Some("read");

        let ack = NodeBuilder::new("ack")
            .attr("to", from.to_string())
            .attr("class", "receipt")
            .attr("id", id.clone())
            .optional_attr("type", receipt_type)
            .build();
        if let Err(e) = self.send_node(ack).await {
            warn!(target: "Client/Recv", "Could not ack receipt {id}: {e}");
        }

        // Batched receipts carry extra ids in a <list> of <item> children.
        let mut message_ids = vec![id];
        if let Some(list) = node.get_optional_child("list") {
            for item in list.get_children_by_tag("item") {
                if let Some(extra) = item.attrs().optional_string("id") {
                    message_ids.push(extra.to_string());
                }
            }
        }

        debug!(
            target: "Client/Recv",
            "Receipt from {from} covering {} message(s)", message_ids.len()
        );
        self.dispatch_event(Event::ClientReceived(ClientReceived {
            from,
            message_ids,
            read,
        }));
    }
}
