use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::axolotl::error::AxolotlError;
use crate::axolotl::keys::KeyPair;

const KDF_TEXT_INFO: &[u8] = b"WhisperText";
const KDF_RATCHET_INFO: &[u8] = b"WhisperRatchet";
const KDF_MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

/// Upper bound on message keys derived ahead for out-of-order delivery.
const MAX_SKIPPED_KEYS: u32 = 2000;

/// How many old receiving chains stay alive for late messages.
const MAX_RECV_CHAINS: usize = 5;

type HmacSha256 = Hmac<Sha256>;

/// Keys for one message, expanded from a chain's message-key seed.
pub struct MessageKeys {
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub iv: [u8; 16],
}

impl MessageKeys {
    pub fn derive(seed: &[u8; 32]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, seed);
        let mut okm = [0u8; 80];
        hk.expand(KDF_MESSAGE_KEYS_INFO, &mut okm)
            .expect("80 bytes is a valid HKDF output length");

        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..]);
        Self {
            cipher_key,
            mac_key,
            iv,
        }
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// One step of a sending or receiving chain: the message-key seed for the
/// current index, and the next chain key.
fn chain_step(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let seed = hmac_sha256(chain_key, &[0x01]);
    let next = hmac_sha256(chain_key, &[0x02]);
    (seed, next)
}

/// Root-key KDF: mixes a fresh DH output into the root, yielding the next
/// root key and a chain key.
fn root_step(root_key: &[u8; 32], dh_output: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(&root_key[..]), dh_output);
    let mut okm = [0u8; 64];
    hk.expand(KDF_RATCHET_INFO, &mut okm)
        .expect("64 bytes is a valid HKDF output length");
    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];
    new_root.copy_from_slice(&okm[..32]);
    chain_key.copy_from_slice(&okm[32..]);
    (new_root, chain_key)
}

/// Initial root/chain derivation from the X3DH master secret.
fn initial_keys(master_secret: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(None, master_secret);
    let mut okm = [0u8; 64];
    hk.expand(KDF_TEXT_INFO, &mut okm)
        .expect("64 bytes is a valid HKDF output length");
    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..]);
    (root, chain)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SendChain {
    chain_key: [u8; 32],
    index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct RecvChain {
    ratchet_key: [u8; 32],
    chain_key: [u8; 32],
    index: u32,
    /// Message-key seeds cached for counters skipped by out-of-order frames.
    skipped: Vec<(u32, [u8; 32])>,
}

impl RecvChain {
    /// Advances the chain to `counter`, caching seeds for skipped indices,
    /// and returns the seed for `counter` itself.
    fn seed_for(&mut self, counter: u32) -> Result<[u8; 32], AxolotlError> {
        if counter < self.index {
            let pos = self
                .skipped
                .iter()
                .position(|(c, _)| *c == counter)
                .ok_or(AxolotlError::DuplicateMessage(counter))?;
            return Ok(self.skipped.remove(pos).1);
        }
        if counter - self.index > MAX_SKIPPED_KEYS {
            return Err(AxolotlError::TooFarInFuture(counter));
        }
        while self.index < counter {
            let (seed, next) = chain_step(&self.chain_key);
            self.skipped.push((self.index, seed));
            self.chain_key = next;
            self.index += 1;
        }
        let (seed, next) = chain_step(&self.chain_key);
        self.chain_key = next;
        self.index += 1;
        Ok(seed)
    }
}

/// Pre-key header carried on outbound messages until the peer confirms the
/// session by answering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
}

/// Double-ratchet session state for one `(jid, device)` pair. Stored as an
/// opaque blob by the key store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub remote_registration_id: u32,
    pub local_identity: [u8; 32],
    pub remote_identity: [u8; 32],

    root_key: [u8; 32],
    current_ratchet: KeyPair,
    remote_ratchet: [u8; 32],
    send_chain: Option<SendChain>,
    recv_chains: Vec<RecvChain>,
    previous_counter: u32,

    pending_pre_key: Option<PendingPreKey>,
}

impl SessionRecord {
    /// Initiator side: derive the session from the peer's published bundle.
    /// `base_key` is our fresh ephemeral; its public half travels in the
    /// pre-key message header.
    pub fn initialize_alice(
        local_identity: &KeyPair,
        base_key: &KeyPair,
        remote_identity: [u8; 32],
        signed_pre_key: [u8; 32],
        one_time_pre_key: Option<[u8; 32]>,
        remote_registration_id: u32,
        pending: PendingPreKey,
    ) -> Self {
        let mut master = Vec::with_capacity(32 * 5);
        master.extend_from_slice(&[0xFF; 32]);
        master.extend_from_slice(&local_identity.agree(&signed_pre_key));
        master.extend_from_slice(&base_key.agree(&remote_identity));
        master.extend_from_slice(&base_key.agree(&signed_pre_key));
        if let Some(otpk) = one_time_pre_key {
            master.extend_from_slice(&base_key.agree(&otpk));
        }
        let (root, chain) = initial_keys(&master);

        // The peer's first replies ride its signed pre-key chain.
        let recv_chain = RecvChain {
            ratchet_key: signed_pre_key,
            chain_key: chain,
            index: 0,
            skipped: Vec::new(),
        };

        // First ratchet step toward the peer's signed pre-key.
        let sending_ratchet = KeyPair::generate();
        let (root, send_chain_key) = root_step(&root, &sending_ratchet.agree(&signed_pre_key));

        Self {
            remote_registration_id,
            local_identity: local_identity.public,
            remote_identity,
            root_key: root,
            current_ratchet: sending_ratchet,
            remote_ratchet: signed_pre_key,
            send_chain: Some(SendChain {
                chain_key: send_chain_key,
                index: 0,
            }),
            recv_chains: vec![recv_chain],
            previous_counter: 0,
            pending_pre_key: Some(pending),
        }
    }

    /// Responder side: derive the session from an inbound pre-key message
    /// header, using our own private key material.
    pub fn initialize_bob(
        local_identity: &KeyPair,
        signed_pre_key: &KeyPair,
        one_time_pre_key: Option<&KeyPair>,
        remote_identity: [u8; 32],
        remote_base_key: [u8; 32],
        remote_registration_id: u32,
    ) -> Self {
        let mut master = Vec::with_capacity(32 * 5);
        master.extend_from_slice(&[0xFF; 32]);
        master.extend_from_slice(&signed_pre_key.agree(&remote_identity));
        master.extend_from_slice(&local_identity.agree(&remote_base_key));
        master.extend_from_slice(&signed_pre_key.agree(&remote_base_key));
        if let Some(otpk) = one_time_pre_key {
            master.extend_from_slice(&otpk.agree(&remote_base_key));
        }
        let (root, chain) = initial_keys(&master);

        Self {
            remote_registration_id,
            local_identity: local_identity.public,
            remote_identity,
            root_key: root,
            // Our replies ride the signed pre-key chain until the first
            // inbound ratchet key forces a step.
            current_ratchet: signed_pre_key.clone(),
            remote_ratchet: remote_base_key,
            send_chain: Some(SendChain {
                chain_key: chain,
                index: 0,
            }),
            recv_chains: Vec::new(),
            previous_counter: 0,
            pending_pre_key: None,
        }
    }

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub fn clear_pending_pre_key(&mut self) {
        self.pending_pre_key = None;
    }

    pub fn ratchet_public(&self) -> [u8; 32] {
        self.current_ratchet.public
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Returns the message-key seed and counter for the next outbound
    /// message, stepping the DH ratchet first if an inbound key invalidated
    /// the sending chain.
    pub fn next_send_keys(&mut self) -> (MessageKeys, u32) {
        if self.send_chain.is_none() {
            let sending_ratchet = KeyPair::generate();
            let (root, chain_key) = root_step(
                &self.root_key,
                &sending_ratchet.agree(&self.remote_ratchet),
            );
            self.root_key = root;
            self.current_ratchet = sending_ratchet;
            self.send_chain = Some(SendChain {
                chain_key,
                index: 0,
            });
        }

        let chain = self.send_chain.as_mut().expect("send chain just ensured");
        let (seed, next) = chain_step(&chain.chain_key);
        let counter = chain.index;
        chain.chain_key = next;
        chain.index += 1;
        (MessageKeys::derive(&seed), counter)
    }

    /// Returns the message keys for an inbound message carrying
    /// `their_ratchet_key` at `counter`, stepping the DH ratchet when the
    /// key is new.
    pub fn recv_keys(
        &mut self,
        their_ratchet_key: [u8; 32],
        counter: u32,
        previous_counter: u32,
    ) -> Result<MessageKeys, AxolotlError> {
        if !self.recv_chains.iter().any(|c| c.ratchet_key == their_ratchet_key) {
            // Cache stragglers from the chain being retired.
            let retiring = self.remote_ratchet;
            if let Some(old) = self
                .recv_chains
                .iter_mut()
                .find(|c| c.ratchet_key == retiring)
            {
                while old.index < previous_counter
                    && (previous_counter - old.index) <= MAX_SKIPPED_KEYS
                {
                    let (seed, next) = chain_step(&old.chain_key);
                    old.skipped.push((old.index, seed));
                    old.chain_key = next;
                    old.index += 1;
                }
            }

            let (root, chain_key) =
                root_step(&self.root_key, &self.current_ratchet.agree(&their_ratchet_key));
            self.root_key = root;
            self.remote_ratchet = their_ratchet_key;
            self.recv_chains.insert(
                0,
                RecvChain {
                    ratchet_key: their_ratchet_key,
                    chain_key,
                    index: 0,
                    skipped: Vec::new(),
                },
            );
            self.recv_chains.truncate(MAX_RECV_CHAINS);

            // The sending chain is stale now; the next send ratchets.
            if let Some(chain) = self.send_chain.take() {
                self.previous_counter = chain.index;
            }
        }

        let chain = self
            .recv_chains
            .iter_mut()
            .find(|c| c.ratchet_key == their_ratchet_key)
            .expect("receiving chain just ensured");
        let seed = chain.seed_for(counter)?;
        Ok(MessageKeys::derive(&seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_step_diverges() {
        let ck = [7u8; 32];
        let (seed, next) = chain_step(&ck);
        assert_ne!(seed, next);
        assert_ne!(seed, ck);
    }

    #[test]
    fn test_message_keys_are_distinct_per_seed() {
        let a = MessageKeys::derive(&[1u8; 32]);
        let b = MessageKeys::derive(&[2u8; 32]);
        assert_ne!(a.cipher_key, b.cipher_key);
        assert_ne!(a.iv, b.iv);
    }

    fn fresh_pair() -> (SessionRecord, SessionRecord) {
        let alice_identity = KeyPair::generate();
        let bob_identity = KeyPair::generate();
        let bob_spk = KeyPair::generate();
        let base_key = KeyPair::generate();

        let alice = SessionRecord::initialize_alice(
            &alice_identity,
            &base_key,
            bob_identity.public,
            bob_spk.public,
            None,
            1,
            PendingPreKey {
                pre_key_id: None,
                signed_pre_key_id: 1,
                base_key: base_key.public,
            },
        );
        let bob = SessionRecord::initialize_bob(
            &bob_identity,
            &bob_spk,
            None,
            alice_identity.public,
            base_key.public,
            1,
        );
        (alice, bob)
    }

    #[test]
    fn test_ratchet_lockstep() {
        let (mut alice, mut bob) = fresh_pair();

        // alice -> bob
        let (alice_keys, counter) = alice.next_send_keys();
        let bob_keys = bob
            .recv_keys(alice.ratchet_public(), counter, alice.previous_counter())
            .unwrap();
        assert_eq!(alice_keys.cipher_key, bob_keys.cipher_key);

        // bob -> alice (forces bob's send ratchet)
        let (bob_keys, counter) = bob.next_send_keys();
        let alice_keys = alice
            .recv_keys(bob.ratchet_public(), counter, bob.previous_counter())
            .unwrap();
        assert_eq!(bob_keys.cipher_key, alice_keys.cipher_key);

        // alice -> bob again, new chains all around
        let (alice_keys, counter) = alice.next_send_keys();
        let bob_keys = bob
            .recv_keys(alice.ratchet_public(), counter, alice.previous_counter())
            .unwrap();
        assert_eq!(alice_keys.cipher_key, bob_keys.cipher_key);
    }

    #[test]
    fn test_out_of_order_messages() {
        let (mut alice, mut bob) = fresh_pair();

        let (keys_0, c0) = alice.next_send_keys();
        let (keys_1, c1) = alice.next_send_keys();
        let ratchet = alice.ratchet_public();
        let prev = alice.previous_counter();

        // Deliver the second message first.
        let bob_keys_1 = bob.recv_keys(ratchet, c1, prev).unwrap();
        assert_eq!(bob_keys_1.cipher_key, keys_1.cipher_key);
        let bob_keys_0 = bob.recv_keys(ratchet, c0, prev).unwrap();
        assert_eq!(bob_keys_0.cipher_key, keys_0.cipher_key);

        // Replaying the same counter fails.
        assert!(matches!(
            bob.recv_keys(ratchet, c0, prev),
            Err(AxolotlError::DuplicateMessage(0))
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let (alice, _) = fresh_pair();
        let blob = serde_json::to_vec(&alice).unwrap();
        let back: SessionRecord = serde_json::from_slice(&blob).unwrap();
        assert_eq!(back, alice);
    }
}
