use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::MissedTickBehavior;

use crate::binary::builder::NodeBuilder;
use crate::binary::node::{Node, NodeContent};
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};

/// Consecutive unanswered pings tolerated before the transport is torn
/// down.
const PING_MISS_BUDGET: u32 = 3;

impl Client {
    /// In-band server housekeeping: answer pings with a pong result and
    /// dirty-presence markers with a clean request.
    pub(crate) async fn handle_ib(&self, node: &Node) {
        if node.get_optional_child("ping").is_some() {
            let id = node
                .attrs()
                .optional_string("id")
                .map(str::to_string)
                .unwrap_or_else(|| self.next_message_id("pong"));
            debug!(target: "Client", "Server ping, answering with pong");
            let pong = NodeBuilder::new("iq")
                .attr("to", self.server_jid().to_string())
                .attr("id", id)
                .attr("type", "result")
                .build();
            if let Err(e) = self.send_node(pong).await {
                warn!(target: "Client", "Failed to send pong: {e}");
            }
            return;
        }

        if let Some(dirty) = node.get_optional_child("dirty") {
            let dirty_type = dirty
                .attrs()
                .optional_string("type")
                .unwrap_or("groups")
                .to_string();
            debug!(target: "Client", "Dirty presence '{dirty_type}', sending clean");
            let clean = NodeBuilder::new("iq")
                .attr("id", self.next_message_id("clean"))
                .attr("type", "set")
                .attr("to", self.server_jid().to_string())
                .attr("xmlns", "urn:xmpp:whatsapp:dirty")
                .children([NodeBuilder::new("clean").attr("type", dirty_type).build()])
                .build();
            if let Err(e) = self.send_node(clean).await {
                warn!(target: "Client", "Failed to send clean: {e}");
            }
            return;
        }

        debug!(target: "Client", "Unhandled ib node: {node}");
    }

    /// Server-initiated IQs: currently only the ping probe.
    pub(crate) async fn handle_server_iq(&self, node: &Node) -> bool {
        if node.attrs().optional_string("type") != Some("get")
            || node.get_optional_child("ping").is_none()
        {
            return false;
        }
        let mut attrs = node.attrs();
        let from = attrs
            .optional_jid("from")
            .unwrap_or_else(|| self.server_jid());
        let id = attrs.optional_string("id").unwrap_or_default().to_string();
        debug!(target: "Client", "Received ping, sending pong");
        let pong = NodeBuilder::new("iq")
            .attr("to", from.to_string())
            .attr("id", id)
            .attr("type", "result")
            .build();
        if let Err(e) = self.send_node(pong).await {
            warn!(target: "Client", "Failed to send pong: {e}");
        }
        true
    }

    /// Outbound liveness probe, the counterpart of `handle_ib`'s inbound
    /// ping. One tracked ping rides the request tracker per
    /// `Config::ping_interval`; after `PING_MISS_BUDGET` consecutive
    /// misses the transport is closed and the run loop's reconnect policy
    /// takes over.
    pub(crate) async fn ping_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.ping_interval.max(5));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so pings start one
        // full period after login.
        ticker.tick().await;

        let mut missed = 0u32;
        loop {
            tokio::select! {
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Ping", "Shutdown signaled, stopping pings");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if !self.is_logged_in() {
                continue;
            }

            match self.send_ping(period / 2).await {
                Ok(()) => {
                    if missed > 0 {
                        debug!(target: "Client/Ping", "Pong restored after {missed} miss(es)");
                    }
                    missed = 0;
                }
                Err(IqError::Client(_)) | Err(IqError::Disconnected) => {
                    debug!(target: "Client/Ping", "Connection gone, stopping pings");
                    return;
                }
                Err(e) => {
                    missed += 1;
                    warn!(
                        target: "Client/Ping",
                        "Missed pong {missed}/{PING_MISS_BUDGET}: {e}"
                    );
                    if missed >= PING_MISS_BUDGET {
                        warn!(target: "Client/Ping", "Pong budget exhausted, closing the transport");
                        if let Some(transport) = self.transport.lock().await.as_ref() {
                            transport.disconnect().await;
                        }
                        return;
                    }
                }
            }
        }
    }

    async fn send_ping(&self, deadline: Duration) -> Result<(), IqError> {
        self.send_iq(InfoQuery {
            namespace: Some("urn:xmpp:ping"),
            query_type: InfoQueryType::Get,
            to: self.server_jid(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("ping").build()])),
            timeout: Some(deadline),
        })
        .await
        .map(|_| ())
    }
}
