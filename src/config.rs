use std::path::PathBuf;

use serde::Deserialize;

/// Client configuration. `msisdn` is required; `password` is required to
/// log in and comes from the registration service as base64.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub msisdn: String,
    pub password: String,
    /// Display name carried in presence.
    pub username: String,

    pub host: String,
    pub server: String,
    pub group_server: String,
    pub port: u16,

    /// Reconnect automatically when the transport ends.
    pub reconnect: bool,
    /// Seconds between outbound liveness pings.
    pub ping_interval: u64,

    pub device_type: String,
    pub app_version: String,
    pub user_agent: String,
    pub mcc: String,
    pub mnc: String,

    pub challenge_file: PathBuf,
    pub keystore_file: Option<PathBuf>,
    /// Used by the external registration flow only.
    pub magic_file: Option<PathBuf>,
    /// Selector for the thumbnail backend.
    pub image_tool: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            msisdn: String::new(),
            password: String::new(),
            username: String::new(),
            host: "c.whatsapp.net".to_string(),
            server: "s.whatsapp.net".to_string(),
            group_server: "g.us".to_string(),
            port: 443,
            reconnect: true,
            ping_interval: 25,
            device_type: "S40".to_string(),
            app_version: "2.12.81".to_string(),
            user_agent: "WhatsApp/2.12.81 S40Version/14.26 Device/Nokia302".to_string(),
            mcc: "001".to_string(),
            mnc: "001".to_string(),
            challenge_file: PathBuf::from("challenge"),
            keystore_file: None,
            magic_file: None,
            image_tool: None,
        }
    }
}

impl Config {
    pub fn new(msisdn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            msisdn: msisdn.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// The resource string identifying this client in the stream header.
    pub fn resource(&self) -> String {
        format!("{}-{}-{}", self.device_type, self.app_version, self.port)
    }
}
