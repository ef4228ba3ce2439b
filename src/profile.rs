use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::binary::builder::NodeBuilder;
use crate::binary::node::NodeContent;
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};
use crate::types::events::{Event, ProfilePicture, StatusEntry, StatusReceived};
use crate::types::Jid;

#[derive(Debug, Clone)]
pub struct LastSeen {
    pub from: Jid,
    pub seconds_ago: u64,
}

#[derive(Debug, Clone)]
pub struct PricingInfo {
    pub price: String,
    pub cost: String,
    pub currency: String,
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivacyCategory {
    LastSeen,
    Status,
    Profile,
}

impl PrivacyCategory {
    fn as_str(&self) -> &'static str {
        match self {
            PrivacyCategory::LastSeen => "last",
            PrivacyCategory::Status => "status",
            PrivacyCategory::Profile => "profile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyValue {
    All,
    Contacts,
    None,
}

impl PrivacyValue {
    fn as_str(&self) -> &'static str {
        match self {
            PrivacyValue::All => "all",
            PrivacyValue::Contacts => "contacts",
            PrivacyValue::None => "none",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "contacts" => PrivacyValue::Contacts,
            "none" => PrivacyValue::None,
            _ => PrivacyValue::All,
        }
    }
}

impl Client {
    /// Asks how long ago a contact was last online.
    pub async fn request_last_seen(&self, msisdn: &str) -> Result<LastSeen, IqError> {
        let to = Jid::from_msisdn(msisdn);
        let response = self
            .send_iq(InfoQuery {
                namespace: Some("jabber:iq:last"),
                query_type: InfoQueryType::Get,
                to: to.clone(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("query").build()])),
                timeout: None,
            })
            .await?;

        let seconds_ago = response
            .get_optional_child("query")
            .and_then(|q| {
                let mut attrs = q.attrs();
                attrs.optional_u64("seconds")
            })
            .unwrap_or(0);
        let from = response
            .attrs()
            .optional_jid("from")
            .unwrap_or(to);
        Ok(LastSeen { from, seconds_ago })
    }

    /// Fetches a profile picture; `preview` asks for the small rendition.
    /// The result is also published as a `ProfilePicture` event.
    pub async fn get_profile_picture(
        &self,
        msisdn: &str,
        preview: bool,
    ) -> Result<ProfilePicture, IqError> {
        let to = Jid::from_msisdn(msisdn);
        let response = self
            .send_iq(InfoQuery {
                namespace: Some("w:profile:picture"),
                query_type: InfoQueryType::Get,
                to: to.clone(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("picture")
                    .attr("type", if preview { "preview" } else { "image" })
                    .build()])),
                timeout: None,
            })
            .await?;

        let picture_node = response.get_optional_child("picture");
        let picture = ProfilePicture {
            from: to,
            picture_id: picture_node
                .and_then(|p| p.attrs().optional_string("id").map(str::to_string)),
            data: picture_node
                .and_then(|p| p.bytes().map(<[u8]>::to_vec))
                .unwrap_or_default(),
        };
        self.dispatch_event(Event::ProfilePicture(picture.clone()));
        Ok(picture)
    }

    /// Replaces our own profile picture.
    pub async fn set_profile_picture(&self, picture: Vec<u8>) -> Result<(), IqError> {
        self.send_iq(InfoQuery {
            namespace: Some("w:profile:picture"),
            query_type: InfoQueryType::Set,
            to: self.self_jid().clone(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("picture")
                .attr("type", "image")
                .bytes(picture)
                .build()])),
            timeout: None,
        })
        .await?;
        Ok(())
    }

    /// Fetches the status lines of the given contacts. The result is also
    /// published as a `StatusReceived` event.
    pub async fn get_statuses(&self, msisdns: &[&str]) -> Result<Vec<StatusEntry>, IqError> {
        let users = msisdns
            .iter()
            .map(|m| {
                NodeBuilder::new("user")
                    .attr("jid", Jid::from_msisdn(m).to_string())
                    .build()
            })
            .collect::<Vec<_>>();
        let response = self
            .send_iq(InfoQuery {
                namespace: Some("status"),
                query_type: InfoQueryType::Get,
                to: self.server_jid(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("status")
                    .children(users)
                    .build()])),
                timeout: None,
            })
            .await?;

        let statuses: Vec<StatusEntry> = response
            .get_optional_child("status")
            .map(|list| {
                list.get_children_by_tag("user")
                    .iter()
                    .filter_map(|u| {
                        let mut attrs = u.attrs();
                        Some(StatusEntry {
                            jid: attrs.optional_jid("jid")?,
                            status: u.content_string().unwrap_or_default(),
                            set_at: attrs
                                .optional_u64("t")
                                .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0)),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.dispatch_event(Event::StatusReceived(StatusReceived {
            statuses: statuses.clone(),
        }));
        Ok(statuses)
    }

    /// Sets our own status line.
    pub async fn set_status(&self, status: &str) -> Result<(), IqError> {
        self.send_iq(InfoQuery {
            namespace: Some("status"),
            query_type: InfoQueryType::Set,
            to: self.server_jid(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("status")
                .bytes(status.as_bytes().to_vec())
                .build()])),
            timeout: None,
        })
        .await?;
        Ok(())
    }

    /// Reads the account's privacy list.
    pub async fn get_privacy_settings(
        &self,
    ) -> Result<HashMap<PrivacyCategory, PrivacyValue>, IqError> {
        let response = self
            .send_iq(InfoQuery {
                namespace: Some("jabber:iq:privacy"),
                query_type: InfoQueryType::Get,
                to: self.server_jid(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("query").build()])),
                timeout: None,
            })
            .await?;

        let mut settings = HashMap::new();
        if let Some(query) = response.get_optional_child("query") {
            for category in query.get_children_by_tag("category") {
                let attrs = category.attrs();
                let Some(name) = attrs.optional_string("name") else {
                    continue;
                };
                let value =
                    PrivacyValue::from_str(attrs.optional_string("value").unwrap_or("all"));
                match name {
                    "last" => settings.insert(PrivacyCategory::LastSeen, value),
                    "status" => settings.insert(PrivacyCategory::Status, value),
                    "profile" => settings.insert(PrivacyCategory::Profile, value),
                    _ => None,
                };
            }
        }
        Ok(settings)
    }

    /// Changes one privacy category.
    pub async fn set_privacy_setting(
        &self,
        category: PrivacyCategory,
        value: PrivacyValue,
    ) -> Result<(), IqError> {
        self.send_iq(InfoQuery {
            namespace: Some("jabber:iq:privacy"),
            query_type: InfoQueryType::Set,
            to: self.server_jid(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("query").children([
                NodeBuilder::new("category")
                    .attr("name", category.as_str())
                    .attr("value", value.as_str())
                    .build(),
            ])
            .build()])),
            timeout: None,
        })
        .await?;
        Ok(())
    }

    /// Reads the server property map.
    pub async fn get_server_properties(&self) -> Result<HashMap<String, String>, IqError> {
        let response = self
            .send_iq(InfoQuery {
                namespace: Some("w"),
                query_type: InfoQueryType::Get,
                to: self.server_jid(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("props").build()])),
                timeout: None,
            })
            .await?;

        let mut props = HashMap::new();
        if let Some(list) = response.get_optional_child("props") {
            for prop in list.get_children_by_tag("prop") {
                let attrs = prop.attrs();
                if let (Some(name), Some(value)) =
                    (attrs.optional_string("name"), attrs.optional_string("value"))
                {
                    props.insert(name.to_string(), value.to_string());
                }
            }
        }
        Ok(props)
    }

    /// Reads the subscription pricing for this account's region.
    pub async fn get_pricing(&self, currency_locale: &str) -> Result<PricingInfo, IqError> {
        let response = self
            .send_iq(InfoQuery {
                namespace: Some("urn:xmpp:whatsapp:account"),
                query_type: InfoQueryType::Get,
                to: self.server_jid(),
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("pricing")
                    .attr("lg", currency_locale)
                    .build()])),
                timeout: None,
            })
            .await?;

        let pricing = response.get_optional_child("pricing");
        let get = |key: &str| {
            pricing
                .and_then(|p| p.attrs().optional_string(key).map(str::to_string))
                .unwrap_or_default()
        };
        Ok(PricingInfo {
            price: get("price"),
            cost: get("cost"),
            currency: get("currency"),
            expiration: pricing
                .and_then(|p| {
                    let mut attrs = p.attrs();
                    attrs.optional_u64("expiration")
                })
                .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0)),
        })
    }

    /// Extends the account subscription.
    pub async fn extend_account(&self) -> Result<(), IqError> {
        self.send_iq(InfoQuery {
            namespace: Some("urn:xmpp:whatsapp:account"),
            query_type: InfoQueryType::Set,
            to: self.server_jid(),
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("extend").build()])),
            timeout: None,
        })
        .await?;
        Ok(())
    }
}
