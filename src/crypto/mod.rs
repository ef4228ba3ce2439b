pub mod key_derivation;
pub mod key_stream;
pub mod xed25519;

pub use key_derivation::{derive_keys, KeyDerivationError, SessionKeys};
pub use key_stream::{KeyStream, KeyStreamError, MAC_LEN};
