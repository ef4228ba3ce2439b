use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::xed25519;

/// A Curve25519 key pair. The private half never leaves this struct except
/// through `private_bytes` for signing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPair {
    pub public: [u8; 32],
    private: [u8; 32],
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            private: secret.to_bytes(),
        }
    }

    pub fn private_bytes(&self) -> &[u8; 32] {
        &self.private
    }

    /// X25519 agreement with a remote public key.
    pub fn agree(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private);
        secret
            .diffie_hellman(&PublicKey::from(*their_public))
            .to_bytes()
    }
}

/// The long-lived identity of this installation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityKeyPair {
    pub key_pair: KeyPair,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            key_pair: KeyPair::generate(),
        }
    }

    pub fn public(&self) -> &[u8; 32] {
        &self.key_pair.public
    }
}

/// Registration ids are 14-bit, matching the wire field.
pub fn generate_registration_id() -> u32 {
    rand::thread_rng().gen_range(1..=0x3FFF)
}

/// A one-time pre-key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn generate(id: u32) -> Self {
        Self {
            id,
            key_pair: KeyPair::generate(),
        }
    }
}

/// Generates `count` one-time pre-keys with random non-colliding ids.
/// Pre-key ids stay in 24 bits so they fit the 3-byte wire form.
pub fn generate_pre_keys(count: usize) -> Vec<PreKeyRecord> {
    let mut rng = rand::thread_rng();
    let mut ids = std::collections::HashSet::with_capacity(count);
    let mut records = Vec::with_capacity(count);
    while records.len() < count {
        let id = rng.gen_range(1..(1u32 << 24));
        if ids.insert(id) {
            records.push(PreKeyRecord::generate(id));
        }
    }
    records
}

/// A medium-lived pre-key whose public half is signed by the identity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
    pub signature: Vec<u8>,
    pub timestamp: i64,
}

impl SignedPreKeyRecord {
    pub fn generate(id: u32, identity: &IdentityKeyPair, timestamp: i64) -> Self {
        let key_pair = KeyPair::generate();
        let signature =
            xed25519::sign(identity.key_pair.private_bytes(), &key_pair.public).to_vec();
        Self {
            id,
            key_pair,
            signature,
            timestamp,
        }
    }
}

/// A remote party's published key material, fetched over the wire.
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub identity_key: [u8; 32],
    pub pre_key_id: Option<u32>,
    pub pre_key: Option<[u8; 32]>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: [u8; 32],
    pub signed_pre_key_signature: Vec<u8>,
}

impl PreKeyBundle {
    /// Checks the XEd25519 signature on the signed pre-key.
    pub fn verify_signature(&self) -> bool {
        let signature: [u8; 64] = match self.signed_pre_key_signature.as_slice().try_into() {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        xed25519::verify(&self.identity_key, &self.signed_pre_key, &signature)
    }
}

/// Fills a buffer with random bytes, for nonce-like material.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_is_symmetric() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_eq!(a.agree(&b.public), b.agree(&a.public));
    }

    #[test]
    fn test_registration_id_range() {
        for _ in 0..100 {
            let id = generate_registration_id();
            assert!(id >= 1 && id <= 0x3FFF);
        }
    }

    #[test]
    fn test_pre_key_ids_unique() {
        let keys = generate_pre_keys(200);
        let ids: std::collections::HashSet<u32> = keys.iter().map(|k| k.id).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_signed_pre_key_verifies() {
        let identity = IdentityKeyPair::generate();
        let signed = SignedPreKeyRecord::generate(1, &identity, 1_700_000_000);
        let bundle = PreKeyBundle {
            registration_id: 42,
            identity_key: *identity.public(),
            pre_key_id: None,
            pre_key: None,
            signed_pre_key_id: signed.id,
            signed_pre_key: signed.key_pair.public,
            signed_pre_key_signature: signed.signature.clone(),
        };
        assert!(bundle.verify_signature());
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let record = PreKeyRecord::generate(7);
        let json = serde_json::to_vec(&record).unwrap();
        let back: PreKeyRecord = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, record);
    }
}
