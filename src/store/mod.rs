pub mod challenge;
pub mod error;
pub mod memory;

use async_trait::async_trait;

use crate::axolotl::{IdentityKeyPair, PreKeyRecord, SessionRecord, SignedPreKeyRecord};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;

#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub registration_id: u32,
    pub identity_key_pair: IdentityKeyPair,
}

/// Persistent key material contract. The session owns the store exclusively
/// while connected; backends only need to be an associative blob store.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn store_local_identity(
        &self,
        registration_id: u32,
        identity_key_pair: &IdentityKeyPair,
    ) -> Result<()>;
    async fn local_identity(&self) -> Result<Option<LocalIdentity>>;

    async fn store_pre_key(&self, id: u32, record: &PreKeyRecord) -> Result<()>;
    async fn pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>>;
    async fn remove_pre_key(&self, id: u32) -> Result<()>;

    async fn store_signed_pre_key(&self, id: u32, record: &SignedPreKeyRecord) -> Result<()>;
    async fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>>;

    async fn store_session(
        &self,
        jid: &str,
        device_id: u32,
        record: &SessionRecord,
    ) -> Result<()>;
    async fn load_session(&self, jid: &str, device_id: u32) -> Result<Option<SessionRecord>>;
}
