//! Cryptographic primitives for the talk E2EE protocol.
//!
//! Everything here is synchronous and free of protocol state: key agreement,
//! the SHA-256 label KDF, the AES modes used by the two message spec versions
//! and by keychain provisioning, the AAD layout and the compact key-id codec.

#![forbid(unsafe_code)]

pub mod error;
pub mod kdf;
pub mod agreement;
pub mod aad;
pub mod cipher;
pub mod varint;

pub use error::CryptoError;

#[cfg(test)]
mod proptests;
