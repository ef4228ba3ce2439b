use hmac::{Hmac, Mac};
use rc4::consts::U20;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// Truncated HMAC tag length carried at the front of every encrypted frame
/// body.
pub const MAC_LEN: usize = 4;

/// Initial keystream bytes discarded before first use.
const RC4_DROP: usize = 768;

#[derive(Debug, Error)]
pub enum KeyStreamError {
    #[error("frame MAC verification failed")]
    MacMismatch,
    #[error("frame body too short to carry a MAC: {0} bytes")]
    ShortFrame(usize),
}

/// One direction of the negotiated frame crypto: an RC4 cipher with 768
/// dropped bytes and an HMAC-SHA1 MAC over `ciphertext || be32(seq)`
/// truncated to four bytes. The sequence counter increments after every
/// encode or decode; reader and writer each own their own instance and the
/// counters must stay in lockstep with the peer or the stream is dead.
pub struct KeyStream {
    cipher: Rc4<U20>,
    mac_key: [u8; 20],
    seq: u32,
}

impl KeyStream {
    pub fn new(cipher_key: &[u8; 20], mac_key: &[u8; 20]) -> Self {
        let mut cipher = Rc4::new(cipher_key.into());
        let mut discard = [0u8; RC4_DROP];
        cipher.apply_keystream(&mut discard);
        Self {
            cipher,
            mac_key: *mac_key,
            seq: 0,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.seq
    }

    fn compute_mac(&self, data: &[u8]) -> [u8; MAC_LEN] {
        let mut mac = <HmacSha1 as Mac>::new_from_slice(&self.mac_key)
            .expect("HMAC accepts any key length");
        mac.update(data);
        mac.update(&self.seq.to_be_bytes());
        let tag = mac.finalize().into_bytes();
        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&tag[..MAC_LEN]);
        out
    }

    /// Enciphers `plaintext` and returns the frame body: the four MAC bytes
    /// followed by the ciphertext.
    pub fn encode(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; MAC_LEN + plaintext.len()];
        body[MAC_LEN..].copy_from_slice(plaintext);
        self.cipher.apply_keystream(&mut body[MAC_LEN..]);
        let tag = self.compute_mac(&body[MAC_LEN..]);
        body[..MAC_LEN].copy_from_slice(&tag);
        self.seq = self.seq.wrapping_add(1);
        body
    }

    /// Verifies the leading MAC of a frame body, then deciphers the rest.
    /// A rejected frame advances nothing; the mismatch is unrecoverable for
    /// the stream and the caller tears it down.
    pub fn decode(&mut self, body: &[u8]) -> Result<Vec<u8>, KeyStreamError> {
        if body.len() < MAC_LEN {
            return Err(KeyStreamError::ShortFrame(body.len()));
        }
        let (tag, ciphertext) = body.split_at(MAC_LEN);
        let expected = self.compute_mac(ciphertext);
        if expected[..].ct_eq(tag).unwrap_u8() != 1 {
            return Err(KeyStreamError::MacMismatch);
        }
        self.seq = self.seq.wrapping_add(1);

        let mut plaintext = ciphertext.to_vec();
        self.cipher.apply_keystream(&mut plaintext);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pair() -> (KeyStream, KeyStream) {
        let cipher_key = [0x11u8; 20];
        let mac_key = [0x22u8; 20];
        (
            KeyStream::new(&cipher_key, &mac_key),
            KeyStream::new(&cipher_key, &mac_key),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (mut writer, mut reader) = key_pair();
        for i in 0..5u8 {
            let plaintext = vec![i; 32 + i as usize];
            let body = writer.encode(&plaintext);
            assert_eq!(body.len(), plaintext.len() + MAC_LEN);
            assert_ne!(&body[MAC_LEN..], plaintext.as_slice());
            let decoded = reader.decode(&body).unwrap();
            assert_eq!(decoded, plaintext);
        }
        assert_eq!(writer.sequence(), reader.sequence());
    }

    #[test]
    fn test_tampered_mac_rejected() {
        let (mut writer, mut reader) = key_pair();
        let mut body = writer.encode(b"hello");
        body[0] ^= 0x01;
        assert!(matches!(
            reader.decode(&body),
            Err(KeyStreamError::MacMismatch)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let (mut writer, mut reader) = key_pair();
        let mut body = writer.encode(b"hello");
        let last = body.len() - 1;
        body[last] ^= 0x01;
        assert!(matches!(
            reader.decode(&body),
            Err(KeyStreamError::MacMismatch)
        ));
    }

    #[test]
    fn test_sequence_desync_is_fatal() {
        let (mut writer, mut reader) = key_pair();
        let first = writer.encode(b"one");
        let second = writer.encode(b"two");
        // Dropping the first frame desynchronizes the reader's counter.
        assert!(reader.decode(&second).is_err());
        let _ = first;
    }

    #[test]
    fn test_short_frame() {
        let (_, mut reader) = key_pair();
        assert!(matches!(
            reader.decode(&[0x00, 0x01]),
            Err(KeyStreamError::ShortFrame(2))
        ));
    }
}
