//! Error types for TLK Core.
//!
//! Every failure of the E2EE core surfaces as an `E2eeError`. The only
//! condition recovered locally is a group key that is not registered yet,
//! which the group resolver answers with a single registration attempt.

use thiserror::Error;
use tlk_crypto::CryptoError;

use crate::directory::NetworkError;
use crate::keychain::CodecError;
use crate::store::StoreError;

/// Unified error type for E2EE operations.
#[derive(Debug, Error)]
pub enum E2eeError {
    /// Recipient kind or peer does not support E2EE
    #[error("unsupported recipient: {0}")]
    UnsupportedRecipient(String),

    /// Message names a spec version this core cannot process
    #[error("unsupported spec version: {0}")]
    UnsupportedSpecVersion(String),

    /// Server reported a key id other than the one requested
    #[error("key id mismatch for {subject}: requested {requested}, server has {actual}")]
    KeyMismatch {
        subject: String,
        requested: i32,
        actual: i32,
    },

    /// Group key still missing after the registration attempt
    #[error("group key not registered: {0}")]
    KeyNotRegistered(String),

    /// AEAD tag verification failed
    #[error("integrity check failed")]
    IntegrityFailure,

    /// Required field absent or malformed
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Spec v1 traffic refused by `LegacyPolicy::Reject`
    #[error("unauthenticated legacy (spec v1) message rejected by policy")]
    LegacyRejected,

    /// No local self key for the requested key id
    #[error("self key unavailable: {0}")]
    SelfKeyUnavailable(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl E2eeError {
    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        E2eeError::MalformedMessage(what.into())
    }
}
