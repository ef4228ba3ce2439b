use crate::binary::builder::NodeBuilder;
use crate::binary::node::NodeContent;
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};
use crate::types::Jid;

/// Outcome of an address-book sync: which numbers are reachable, which are
/// not registered, and which the server refused to parse.
#[derive(Debug, Clone, Default)]
pub struct ContactsSyncResult {
    pub existing: Vec<Jid>,
    pub non_existing: Vec<String>,
    pub invalid: Vec<String>,
}

impl Client {
    /// Synchronizes phone numbers against the registration database.
    pub async fn sync_contacts(&self, numbers: &[&str]) -> Result<ContactsSyncResult, IqError> {
        let users = numbers
            .iter()
            .map(|n| NodeBuilder::new("user").bytes(n.as_bytes().to_vec()).build())
            .collect::<Vec<_>>();

        let response = self
            .send_iq(InfoQuery {
                namespace: Some("urn:xmpp:whatsapp:sync"),
                query_type: InfoQueryType::Get,
                to: self.self_jid().clone(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("sync")
                    .attr("mode", "full")
                    .attr("context", "registration")
                    .attr("index", "0")
                    .attr("last", "true")
                    .children(users)
                    .build()])),
                timeout: None,
            })
            .await?;

        let mut result = ContactsSyncResult::default();
        let Some(sync) = response.get_optional_child("sync") else {
            return Ok(result);
        };

        if let Some(list) = sync.get_optional_child("in") {
            result.existing = list
                .get_children_by_tag("user")
                .iter()
                .filter_map(|u| u.attrs().optional_string("jid")?.parse().ok())
                .collect();
        }
        if let Some(list) = sync.get_optional_child("out") {
            result.non_existing = list
                .get_children_by_tag("user")
                .iter()
                .filter_map(|u| u.content_string())
                .collect();
        }
        if let Some(list) = sync.get_optional_child("invalid") {
            result.invalid = list
                .get_children_by_tag("user")
                .iter()
                .filter_map(|u| u.content_string())
                .collect();
        }
        Ok(result)
    }
}
