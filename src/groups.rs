use chrono::{DateTime, Utc};

use crate::binary::builder::NodeBuilder;
use crate::binary::node::{Node, NodeContent};
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};
use crate::types::events::{Event, GroupList};
use crate::types::Jid;

const GROUPS_NAMESPACE: &str = "w:g2";

#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub jid: Jid,
    pub owner: Option<Jid>,
    pub subject: String,
    pub creation: Option<DateTime<Utc>>,
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone)]
pub struct GroupParticipant {
    pub jid: Jid,
    pub admin: bool,
}

/// Which side of the membership relation to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupListKind {
    Participating,
    Owning,
}

impl GroupListKind {
    fn as_str(&self) -> &'static str {
        match self {
            GroupListKind::Participating => "participating",
            GroupListKind::Owning => "owning",
        }
    }
}

fn parse_group_node(node: &Node) -> Option<GroupInfo> {
    let mut attrs = node.attrs();
    let id = attrs.optional_string("id")?;
    let jid = if id.contains('@') {
        id.parse().ok()?
    } else {
        Jid::group(id)
    };
    let participants = node
        .get_children_by_tag("participant")
        .iter()
        .filter_map(|p| {
            let mut attrs = p.attrs();
            Some(GroupParticipant {
                jid: attrs.optional_jid("jid")?,
                admin: attrs.optional_string("type") == Some("admin"),
            })
        })
        .collect();
    Some(GroupInfo {
        jid,
        owner: attrs.optional_jid("owner"),
        subject: attrs.optional_string("subject").unwrap_or_default().to_string(),
        creation: attrs
            .optional_u64("creation")
            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0)),
        participants,
    })
}

impl Client {
    fn group_server_jid(&self) -> Jid {
        Jid::new("", self.config.group_server.clone())
    }

    /// Lists groups this account participates in or owns. The result is
    /// also published as a `GroupList` event.
    pub async fn list_groups(&self, kind: GroupListKind) -> Result<Vec<GroupInfo>, IqError> {
        let response = self
            .send_iq(InfoQuery {
                namespace: Some(GROUPS_NAMESPACE),
                query_type: InfoQueryType::Get,
                to: self.group_server_jid(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new(kind.as_str())
                    .build()])),
                timeout: None,
            })
            .await?;

        let groups: Vec<GroupInfo> = response
            .get_optional_child("groups")
            .map(|list| {
                list.get_children_by_tag("group")
                    .iter()
                    .filter_map(|g| parse_group_node(g))
                    .collect()
            })
            .unwrap_or_default();

        self.dispatch_event(Event::GroupList(GroupList {
            groups: groups.clone(),
        }));
        Ok(groups)
    }

    /// Fetches one group's metadata and member list.
    pub async fn group_info(&self, group: &Jid) -> Result<Option<GroupInfo>, IqError> {
        let response = self
            .send_iq(InfoQuery {
                namespace: Some(GROUPS_NAMESPACE),
                query_type: InfoQueryType::Get,
                to: group.clone(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("query")
                    .attr("request", "interactive")
                    .build()])),
                timeout: None,
            })
            .await?;
        Ok(response
            .get_optional_child("group")
            .and_then(parse_group_node))
    }

    /// Creates a group and invites the given members.
    pub async fn create_group(
        &self,
        subject: &str,
        participants: &[&str],
    ) -> Result<Option<Jid>, IqError> {
        let members = participants
            .iter()
            .map(|p| {
                NodeBuilder::new("participant")
                    .attr("jid", Jid::from_msisdn(p).to_string())
                    .build()
            })
            .collect::<Vec<_>>();
        let response = self
            .send_iq(InfoQuery {
                namespace: Some(GROUPS_NAMESPACE),
                query_type: InfoQueryType::Set,
                to: self.group_server_jid(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("create")
                    .attr("subject", subject)
                    .children(members)
                    .build()])),
                timeout: None,
            })
            .await?;
        Ok(response
            .get_optional_child("group")
            .and_then(parse_group_node)
            .map(|info| info.jid))
    }

    pub async fn add_group_participants(
        &self,
        group: &Jid,
        participants: &[&str],
    ) -> Result<(), IqError> {
        self.change_group_participants(group, participants, "add")
            .await
    }

    pub async fn remove_group_participants(
        &self,
        group: &Jid,
        participants: &[&str],
    ) -> Result<(), IqError> {
        self.change_group_participants(group, participants, "remove")
            .await
    }

    pub async fn promote_group_participants(
        &self,
        group: &Jid,
        participants: &[&str],
    ) -> Result<(), IqError> {
        self.change_group_participants(group, participants, "promote")
            .await
    }

    pub async fn demote_group_participants(
        &self,
        group: &Jid,
        participants: &[&str],
    ) -> Result<(), IqError> {
        self.change_group_participants(group, participants, "demote")
            .await
    }

    async fn change_group_participants(
        &self,
        group: &Jid,
        participants: &[&str],
        action: &str,
    ) -> Result<(), IqError> {
        let members = participants
            .iter()
            .map(|p| {
                NodeBuilder::new("participant")
                    .attr("jid", Jid::from_msisdn(p).to_string())
                    .build()
            })
            .collect::<Vec<_>>();
        self.send_iq(InfoQuery {
            namespace: Some(GROUPS_NAMESPACE),
            query_type: InfoQueryType::Set,
            to: group.clone(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new(action)
                .children(members)
                .build()])),
            timeout: None,
        })
        .await?;
        Ok(())
    }

    pub async fn leave_group(&self, group: &Jid) -> Result<(), IqError> {
        self.send_iq(InfoQuery {
            namespace: Some(GROUPS_NAMESPACE),
            query_type: InfoQueryType::Set,
            to: self.group_server_jid(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("leave")
                .children([NodeBuilder::new("group")
                    .attr("id", group.to_string())
                    .build()])
                .build()])),
            timeout: None,
        })
        .await?;
        Ok(())
    }

    pub async fn set_group_subject(&self, group: &Jid, subject: &str) -> Result<(), IqError> {
        self.send_iq(InfoQuery {
            namespace: Some(GROUPS_NAMESPACE),
            query_type: InfoQueryType::Set,
            to: group.clone(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("subject")
                .bytes(subject.as_bytes().to_vec())
                .build()])),
            timeout: None,
        })
        .await?;
        Ok(())
    }
}
