use std::time::Duration;

use log::warn;
use thiserror::Error;
use tokio::time::timeout;

use crate::binary::builder::NodeBuilder;
use crate::binary::node::{Node, NodeContent};
use crate::client::{Client, ClientError};
use crate::types::Jid;

/// Represents the type of an IQ stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQueryType {
    Set,
    Get,
}

impl InfoQueryType {
    fn as_str(&self) -> &'static str {
        match self {
            InfoQueryType::Set => "set",
            InfoQueryType::Get => "get",
        }
    }
}

/// Defines an IQ request to be sent to the server.
#[derive(Debug, Clone)]
pub struct InfoQuery<'a> {
    pub namespace: Option<&'a str>,
    pub query_type: InfoQueryType,
    pub to: Jid,
    pub id: Option<String>,
    pub content: Option<NodeContent>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum IqError {
    #[error("IQ request timed out")]
    Timeout,
    #[error("client error: {0}")]
    Client(#[from] ClientError),
    #[error("disconnected while waiting for the response")]
    Disconnected,
    #[error("server error response: code={code}, text='{text}'")]
    ServerError { code: u16, text: String },
    #[error("internal channel closed unexpectedly")]
    InternalChannelClosed,
}

const DEFAULT_IQ_TIMEOUT: Duration = Duration::from_secs(75);

/// Synthetic node delivered to waiters when the connection dies.
pub(crate) const DISCONNECT_NODE_TAG: &str = "xmlstreamend";

impl Client {
    /// Sends an IQ stanza and waits for the matching `result`/`error` reply.
    pub async fn send_iq(&self, query: InfoQuery<'_>) -> Result<Node, IqError> {
        let req_id = query
            .id
            .unwrap_or_else(|| self.next_message_id("iq"));

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(req_id.clone(), tx);

        let node = NodeBuilder::new("iq")
            .attr("id", req_id.clone())
            .optional_attr("xmlns", query.namespace)
            .attr("type", query.query_type.as_str())
            .attr("to", query.to.to_string())
            .apply_content(query.content)
            .build();

        if let Err(e) = self.send_node(node).await {
            self.response_waiters.lock().await.remove(&req_id);
            return Err(e.into());
        }

        match timeout(query.timeout.unwrap_or(DEFAULT_IQ_TIMEOUT), rx).await {
            Ok(Ok(response)) => {
                if response.tag == DISCONNECT_NODE_TAG {
                    return Err(IqError::Disconnected);
                }
                if response.attrs().optional_string("type") == Some("error") {
                    return Err(parse_error_response(&response));
                }
                Ok(response)
            }
            Ok(Err(_)) => Err(IqError::InternalChannelClosed),
            Err(_) => {
                self.response_waiters.lock().await.remove(&req_id);
                Err(IqError::Timeout)
            }
        }
    }

    /// Routes an inbound `iq` or `ack` to the waiting request, if any.
    pub(crate) async fn handle_tracked_response(&self, node: &Node) -> bool {
        let Some(id) = node.attrs().optional_string("id").map(str::to_string) else {
            return false;
        };
        if let Some(waiter) = self.response_waiters.lock().await.remove(&id) {
            if waiter.send(node.clone()).is_err() {
                warn!(target: "Client/IQ", "Response waiter for {id} was dropped");
            }
            return true;
        }
        false
    }

    /// Resolves every in-flight request with a disconnect error.
    pub(crate) async fn fail_pending_requests(&self) {
        let mut waiters = self.response_waiters.lock().await;
        for (_, waiter) in waiters.drain() {
            let _ = waiter.send(NodeBuilder::new(DISCONNECT_NODE_TAG).build());
        }
    }
}

fn parse_error_response(response: &Node) -> IqError {
    match response.get_optional_child("error") {
        Some(error_node) => {
            let mut parser = error_node.attrs();
            let code = parser.optional_u64("code").unwrap_or(0) as u16;
            let text = parser
                .optional_string("text")
                .unwrap_or_default()
                .to_string();
            if !parser.ok() {
                warn!(
                    target: "Client/IQ",
                    "Attribute parsing errors in IQ error response: {:?}", parser.errors
                );
            }
            IqError::ServerError { code, text }
        }
        None => IqError::ServerError {
            code: 0,
            text: "malformed error response".to_string(),
        },
    }
}
