use xeddsa::xed25519::{PrivateKey, PublicKey};

/// XEd25519 signature over a Curve25519 key pair, as used for signed
/// pre-keys.
pub fn sign(private_key_bytes: &[u8; 32], message: &[u8]) -> [u8; 64] {
    let priv_key = PrivateKey(*private_key_bytes);
    let rng = rand_xeddsa::rng();
    <PrivateKey as xeddsa::xeddsa::Sign<[u8; 64], [u8; 32], [u8; 32]>>::sign(
        &priv_key, message, rng,
    )
}

pub fn verify(public_key_bytes: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let pub_key = PublicKey(*public_key_bytes);
    <PublicKey as xeddsa::xeddsa::Verify<[u8; 64], [u8; 32]>>::verify(&pub_key, message, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axolotl::keys::KeyPair;

    #[test]
    fn test_sign_verify_roundtrip() {
        let pair = KeyPair::generate();
        let message = b"signed pre-key public material";
        let signature = sign(pair.private_bytes(), message);
        assert!(verify(&pair.public, message, &signature));
        assert!(!verify(&pair.public, b"different message", &signature));

        let mut bad_signature = signature;
        bad_signature[0] ^= 0x01;
        assert!(!verify(&pair.public, message, &bad_signature));
    }
}
