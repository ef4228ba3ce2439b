use base64::prelude::*;
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use thiserror::Error;

/// PBKDF2 rounds used by the legacy key schedule. Low by modern standards,
/// but fixed by the protocol.
const KDF_ITERATIONS: u32 = 2;

pub const KEY_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum KeyDerivationError {
    #[error("password is not valid base64: {0}")]
    BadPassword(#[from] base64::DecodeError),
}

/// The four 20-byte outputs of the login key schedule. Outputs one and two
/// drive the writer's cipher and MAC; three and four drive the reader's.
pub struct SessionKeys {
    pub write_cipher: [u8; KEY_LEN],
    pub write_mac: [u8; KEY_LEN],
    pub read_cipher: [u8; KEY_LEN],
    pub read_mac: [u8; KEY_LEN],
}

/// Runs PBKDF2-HMAC-SHA1 over the registration password with salt
/// `nonce || j` for each output slot j in 1..=4.
pub fn derive_keys(password_b64: &str, nonce: &[u8]) -> Result<SessionKeys, KeyDerivationError> {
    let password = BASE64_STANDARD.decode(password_b64)?;

    let mut outputs = [[0u8; KEY_LEN]; 4];
    let mut salt = Vec::with_capacity(nonce.len() + 1);
    for (j, output) in outputs.iter_mut().enumerate() {
        salt.clear();
        salt.extend_from_slice(nonce);
        salt.push(j as u8 + 1);
        pbkdf2_hmac::<Sha1>(&password, &salt, KDF_ITERATIONS, output);
    }

    let [write_cipher, write_mac, read_cipher, read_mac] = outputs;
    Ok(SessionKeys {
        write_cipher,
        write_mac,
        read_cipher,
        read_mac,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_are_distinct() {
        let keys = derive_keys("cGFzc3dvcmQ=", &[0xAA; 32]).unwrap();
        assert_ne!(keys.write_cipher, keys.write_mac);
        assert_ne!(keys.write_cipher, keys.read_cipher);
        assert_ne!(keys.read_cipher, keys.read_mac);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_keys("cGFzc3dvcmQ=", &[0xAA; 32]).unwrap();
        let b = derive_keys("cGFzc3dvcmQ=", &[0xAA; 32]).unwrap();
        assert_eq!(a.write_cipher, b.write_cipher);
        assert_eq!(a.read_mac, b.read_mac);
    }

    #[test]
    fn test_nonce_changes_all_outputs() {
        let a = derive_keys("cGFzc3dvcmQ=", &[0xAA; 32]).unwrap();
        let b = derive_keys("cGFzc3dvcmQ=", &[0xAB; 32]).unwrap();
        assert_ne!(a.write_cipher, b.write_cipher);
        assert_ne!(a.read_mac, b.read_mac);
    }

    #[test]
    fn test_bad_base64_password() {
        assert!(derive_keys("not base64!!", &[0u8; 4]).is_err());
    }
}
