pub use wachat_binary as binary;

pub mod types {
    pub mod events;
    pub mod message;
    pub mod presence;

    pub use wachat_binary::jid::Jid;
}

pub mod axolotl;
pub mod client;
pub mod config;
pub mod contacts;
pub mod crypto;
pub mod encryption;
pub mod groups;
pub mod handshake;
pub mod ib;
pub mod media;
pub mod message;
pub mod notification;
pub mod presence;
pub mod profile;
pub mod receipt;
pub mod request;
pub mod send;
pub mod socket;
pub mod store;
pub mod transport;

pub mod test_utils;

pub use client::Client;
pub use config::Config;
