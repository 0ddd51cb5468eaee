//! Error type shared by every primitive in this crate.

/// Errors raised by the cryptographic primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: &'static str, got: usize },
    #[error("invalid iv/nonce length: expected {expected}, got {got}")]
    InvalidIvLength { expected: usize, got: usize },
    #[error("input is not a multiple of the block size ({got} bytes)")]
    InvalidBlockLength { got: usize },
    #[error("invalid padding")]
    Padding,
    #[error("authentication tag verification failed")]
    AuthenticationFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("RNG failed")]
    RngError,
    #[error("fixed key id must be 4 bytes, got {got}")]
    KeyIdLength { got: usize },
    #[error("malformed varint: {0}")]
    Varint(&'static str),
}
