pub mod cipher;
pub mod error;
pub mod keys;
pub mod record;

pub use cipher::{MessageType, PreKeySignalMessage, SignalMessage, WireMessage};
pub use error::AxolotlError;
pub use keys::{
    generate_pre_keys, generate_registration_id, IdentityKeyPair, KeyPair, PreKeyBundle,
    PreKeyRecord, SignedPreKeyRecord,
};
pub use record::{PendingPreKey, SessionRecord};

/// Every legacy peer is device 1; there is no multi-device in this protocol.
pub const DEVICE_ID: u32 = 1;

/// Pre-key pool size maintained on the server.
pub const PRE_KEY_TARGET: usize = 200;

/// Key type marker for Curve25519 material in published key lists.
pub const KEY_TYPE_DJB: u8 = 0x05;
