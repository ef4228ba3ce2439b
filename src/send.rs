use chrono::Utc;
use log::{debug, warn};

use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::{Client, ClientError};
use crate::types::Jid;

/// A message built before login, waiting for the session to open.
pub struct QueuedSend {
    pub to: Jid,
    pub node: Node,
}

impl Client {
    /// Sends a text message, or queues it when the session is not logged in
    /// yet. Returns the generated message id.
    pub async fn send_message(&self, to: &str, body: &str) -> Result<String, ClientError> {
        let children = vec![NodeBuilder::new("body")
            .bytes(body.as_bytes().to_vec())
            .build()];
        self.send_message_node(Jid::from_msisdn(to), "text", children)
            .await
    }

    /// Sends a location with an optional place name and preview thumbnail.
    pub async fn send_location_message(
        &self,
        to: &str,
        latitude: f64,
        longitude: f64,
        name: Option<&str>,
        thumbnail: Vec<u8>,
    ) -> Result<String, ClientError> {
        let media = NodeBuilder::new("media")
            .attr("type", "location")
            .attr("latitude", latitude.to_string())
            .attr("longitude", longitude.to_string())
            .optional_attr("name", name)
            .attr("encoding", "raw")
            .bytes(thumbnail)
            .build();
        self.send_message_node(Jid::from_msisdn(to), "media", vec![media])
            .await
    }

    /// Sends a contact card.
    pub async fn send_vcard_message(
        &self,
        to: &str,
        name: &str,
        vcard: Vec<u8>,
    ) -> Result<String, ClientError> {
        let media = NodeBuilder::new("media").attr("type", "vcard").children([
            NodeBuilder::new("vcard").attr("name", name).bytes(vcard).build(),
        ]);
        self.send_message_node(Jid::from_msisdn(to), "media", vec![media.build()])
            .await
    }

    /// Builds the message stanza and either sends it now or queues it for
    /// the post-login flush.
    pub(crate) async fn send_message_node(
        &self,
        to: Jid,
        message_type: &str,
        children: Vec<Node>,
    ) -> Result<String, ClientError> {
        let id = self.next_message_id("message");
        let node = NodeBuilder::new("message")
            .attr("to", to.to_string())
            .attr("type", message_type)
            .attr("id", id.clone())
            .attr("t", Utc::now().timestamp().to_string())
            .children(children)
            .build();

        if self.is_logged_in() {
            self.send_node(node).await?;
        } else {
            debug!(target: "Client/Send", "Not logged in, queueing message {id}");
            self.send_queue.lock().await.push(QueuedSend { to, node });
        }
        Ok(id)
    }

    /// Drains the pre-login queue in submission order.
    pub(crate) async fn flush_send_queue(&self) {
        let queued: Vec<QueuedSend> = self.send_queue.lock().await.drain(..).collect();
        if queued.is_empty() {
            return;
        }
        debug!(target: "Client/Send", "Flushing {} queued message(s)", queued.len());
        for entry in queued {
            if let Err(e) = self.send_node(entry.node).await {
                warn!(
                    target: "Client/Send",
                    "Failed to flush queued message to {}: {e}", entry.to
                );
            }
        }
    }
}
