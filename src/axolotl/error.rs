use thiserror::Error;

#[derive(Debug, Error)]
pub enum AxolotlError {
    #[error("message too short or malformed")]
    MalformedMessage,
    #[error("unsupported ciphertext version {0:#x}")]
    UnsupportedVersion(u8),
    #[error("message MAC verification failed")]
    BadMac,
    #[error("message key for counter {0} already used")]
    DuplicateMessage(u32),
    #[error("counter {0} is too far in the future")]
    TooFarInFuture(u32),
    #[error("no session established for this address")]
    NoSession,
    #[error("pre-key {0} not found in the store")]
    UnknownPreKey(u32),
    #[error("signed pre-key {0} not found in the store")]
    UnknownSignedPreKey(u32),
    #[error("pre-key bundle signature is invalid")]
    BadBundleSignature,
    #[error("ciphertext length {0} is not a whole number of cipher blocks")]
    BadCiphertextLength(usize),
    #[error("ciphertext padding is invalid")]
    BadPadding,
    #[error("key store failure: {0}")]
    Store(String),
}
