use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::axolotl::{IdentityKeyPair, PreKeyRecord, SessionRecord, SignedPreKeyRecord};
use crate::store::{KeyStore, LocalIdentity, Result};

/// In-memory key store for tests and hosts that don't persist sessions.
#[derive(Default)]
pub struct MemoryStore {
    identity: Mutex<Option<LocalIdentity>>,
    pre_keys: Mutex<HashMap<u32, PreKeyRecord>>,
    signed_pre_keys: Mutex<HashMap<u32, SignedPreKeyRecord>>,
    sessions: Mutex<HashMap<(String, u32), SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_key_count(&self) -> usize {
        self.pre_keys.lock().expect("lock poisoned").len()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn store_local_identity(
        &self,
        registration_id: u32,
        identity_key_pair: &IdentityKeyPair,
    ) -> Result<()> {
        *self.identity.lock().expect("lock poisoned") = Some(LocalIdentity {
            registration_id,
            identity_key_pair: identity_key_pair.clone(),
        });
        Ok(())
    }

    async fn local_identity(&self) -> Result<Option<LocalIdentity>> {
        Ok(self.identity.lock().expect("lock poisoned").clone())
    }

    async fn store_pre_key(&self, id: u32, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys
            .lock()
            .expect("lock poisoned")
            .insert(id, record.clone());
        Ok(())
    }

    async fn pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
        Ok(self.pre_keys.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn remove_pre_key(&self, id: u32) -> Result<()> {
        self.pre_keys.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }

    async fn store_signed_pre_key(&self, id: u32, record: &SignedPreKeyRecord) -> Result<()> {
        self.signed_pre_keys
            .lock()
            .expect("lock poisoned")
            .insert(id, record.clone());
        Ok(())
    }

    async fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
        Ok(self
            .signed_pre_keys
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn store_session(
        &self,
        jid: &str,
        device_id: u32,
        record: &SessionRecord,
    ) -> Result<()> {
        self.sessions
            .lock()
            .expect("lock poisoned")
            .insert((jid.to_string(), device_id), record.clone());
        Ok(())
    }

    async fn load_session(&self, jid: &str, device_id: u32) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .lock()
            .expect("lock poisoned")
            .get(&(jid.to_string(), device_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axolotl;

    #[tokio::test]
    async fn test_identity_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.local_identity().await.unwrap().is_none());

        let identity = IdentityKeyPair::generate();
        store.store_local_identity(1234, &identity).await.unwrap();

        let loaded = store.local_identity().await.unwrap().unwrap();
        assert_eq!(loaded.registration_id, 1234);
        assert_eq!(loaded.identity_key_pair, identity);
    }

    #[tokio::test]
    async fn test_pre_key_lifecycle() {
        let store = MemoryStore::new();
        let record = axolotl::PreKeyRecord::generate(9);
        store.store_pre_key(9, &record).await.unwrap();
        assert_eq!(store.pre_key(9).await.unwrap(), Some(record));
        store.remove_pre_key(9).await.unwrap();
        assert!(store.pre_key(9).await.unwrap().is_none());
    }
}
