use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use bytes::{Buf, BufMut};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::axolotl::error::AxolotlError;
use crate::axolotl::record::{MessageKeys, SessionRecord};

/// Version byte carried by every ciphertext: protocol major/minor packed
/// into nibbles.
pub const CIPHERTEXT_VERSION: u8 = 0x33;

/// Truncated HMAC-SHA256 appended to every ratchet message.
const MAC_LEN: usize = 8;

/// Sentinel for "no one-time pre-key" in the pkmsg header.
const NO_PRE_KEY_ID: u32 = u32::MAX;

const CIPHER_BLOCK: usize = 16;

type HmacSha256 = Hmac<Sha256>;
type PayloadCipher = cbc::Encryptor<aes::Aes256>;
type PayloadDecipher = cbc::Decryptor<aes::Aes256>;

/// Seals one ratchet payload: AES-256-CBC under the message keys the chain
/// produced for this counter, PKCS#7 padded to whole blocks.
fn seal_payload(keys: &MessageKeys, plaintext: &[u8]) -> Vec<u8> {
    PayloadCipher::new((&keys.cipher_key).into(), (&keys.iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Opens a sealed ratchet payload. Runs after the MAC check, so a failure
/// here means corrupted padding rather than tampering.
fn open_payload(keys: &MessageKeys, ciphertext: &[u8]) -> Result<Vec<u8>, AxolotlError> {
    if ciphertext.is_empty() || ciphertext.len() % CIPHER_BLOCK != 0 {
        return Err(AxolotlError::BadCiphertextLength(ciphertext.len()));
    }
    PayloadDecipher::new((&keys.cipher_key).into(), (&keys.iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| AxolotlError::BadPadding)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Ordinary ratchet message on an established session.
    Msg,
    /// Pre-key message that also establishes the inbound session.
    PkMsg,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Msg => "msg",
            MessageType::PkMsg => "pkmsg",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "msg" => Some(MessageType::Msg),
            "pkmsg" => Some(MessageType::PkMsg),
            _ => None,
        }
    }
}

/// An encrypted payload ready to travel inside an `<enc>` node.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub message_type: MessageType,
    pub data: Vec<u8>,
}

/// Parsed ratchet message, MAC not yet verified.
pub struct SignalMessage {
    pub ratchet_key: [u8; 32],
    pub counter: u32,
    pub previous_counter: u32,
    pub ciphertext: Vec<u8>,
    /// Everything before the MAC, exactly as received.
    pub serialized: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl SignalMessage {
    pub fn parse(data: &[u8]) -> Result<Self, AxolotlError> {
        if data.len() < 1 + 32 + 4 + 4 + MAC_LEN {
            return Err(AxolotlError::MalformedMessage);
        }
        let version = data[0];
        if version != CIPHERTEXT_VERSION {
            return Err(AxolotlError::UnsupportedVersion(version));
        }

        let (body, mac_bytes) = data.split_at(data.len() - MAC_LEN);
        let mut cursor = &body[1..];
        let mut ratchet_key = [0u8; 32];
        cursor.copy_to_slice(&mut ratchet_key);
        let counter = cursor.get_u32();
        let previous_counter = cursor.get_u32();
        let ciphertext = cursor.to_vec();

        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(mac_bytes);

        Ok(Self {
            ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized: body.to_vec(),
            mac,
        })
    }
}

/// Parsed pre-key message header with the inner ratchet message still
/// serialized.
pub struct PreKeySignalMessage {
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
    pub identity_key: [u8; 32],
    pub message: Vec<u8>,
}

impl PreKeySignalMessage {
    pub fn parse(data: &[u8]) -> Result<Self, AxolotlError> {
        if data.len() < 1 + 4 + 4 + 4 + 32 + 32 {
            return Err(AxolotlError::MalformedMessage);
        }
        let version = data[0];
        if version != CIPHERTEXT_VERSION {
            return Err(AxolotlError::UnsupportedVersion(version));
        }

        let mut cursor = &data[1..];
        let registration_id = cursor.get_u32();
        let raw_pre_key_id = cursor.get_u32();
        let signed_pre_key_id = cursor.get_u32();
        let mut base_key = [0u8; 32];
        cursor.copy_to_slice(&mut base_key);
        let mut identity_key = [0u8; 32];
        cursor.copy_to_slice(&mut identity_key);

        Ok(Self {
            registration_id,
            pre_key_id: (raw_pre_key_id != NO_PRE_KEY_ID).then_some(raw_pre_key_id),
            signed_pre_key_id,
            base_key,
            identity_key,
            message: cursor.to_vec(),
        })
    }
}

fn message_mac(
    mac_key: &[u8; 32],
    sender_identity: &[u8; 32],
    receiver_identity: &[u8; 32],
    body: &[u8],
) -> [u8; MAC_LEN] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(mac_key).expect("HMAC accepts any key length");
    mac.update(sender_identity);
    mac.update(receiver_identity);
    mac.update(body);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&tag[..MAC_LEN]);
    out
}

/// Encrypts one plaintext on the session, returning a `msg` payload, or a
/// `pkmsg` payload while the session still awaits its first reply.
pub fn encrypt(
    session: &mut SessionRecord,
    local_registration_id: u32,
    plaintext: &[u8],
) -> Result<WireMessage, AxolotlError> {
    let (keys, counter) = session.next_send_keys();
    let ciphertext = seal_payload(&keys, plaintext);

    let mut body = Vec::with_capacity(1 + 32 + 4 + 4 + ciphertext.len() + MAC_LEN);
    body.put_u8(CIPHERTEXT_VERSION);
    body.put_slice(&session.ratchet_public());
    body.put_u32(counter);
    body.put_u32(session.previous_counter());
    body.put_slice(&ciphertext);

    let tag = message_mac(
        &keys.mac_key,
        &session.local_identity,
        &session.remote_identity,
        &body,
    );
    body.put_slice(&tag);

    match session.pending_pre_key() {
        Some(pending) => {
            let mut out = Vec::with_capacity(1 + 4 + 4 + 4 + 32 + 32 + body.len());
            out.put_u8(CIPHERTEXT_VERSION);
            out.put_u32(local_registration_id);
            out.put_u32(pending.pre_key_id.unwrap_or(NO_PRE_KEY_ID));
            out.put_u32(pending.signed_pre_key_id);
            out.put_slice(&pending.base_key);
            out.put_slice(&session.local_identity);
            out.put_slice(&body);
            Ok(WireMessage {
                message_type: MessageType::PkMsg,
                data: out,
            })
        }
        None => Ok(WireMessage {
            message_type: MessageType::Msg,
            data: body,
        }),
    }
}

/// Decrypts a `msg` payload on the session. State only advances when the
/// MAC verifies and the ciphertext opens.
pub fn decrypt(session: &mut SessionRecord, data: &[u8]) -> Result<Vec<u8>, AxolotlError> {
    let message = SignalMessage::parse(data)?;

    let mut working = session.clone();
    let keys = working.recv_keys(
        message.ratchet_key,
        message.counter,
        message.previous_counter,
    )?;

    let expected = message_mac(
        &keys.mac_key,
        &working.remote_identity,
        &working.local_identity,
        &message.serialized,
    );
    if expected[..].ct_eq(&message.mac).unwrap_u8() != 1 {
        return Err(AxolotlError::BadMac);
    }

    let plaintext = open_payload(&keys, &message.ciphertext)?;
    working.clear_pending_pre_key();
    *session = working;
    Ok(plaintext)
}
