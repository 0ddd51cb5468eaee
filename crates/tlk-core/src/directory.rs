//! Collaborator interfaces towards the chat service.
//!
//! The core never talks to the network itself. Key lookups and group key
//! registration go through `KeyDirectory`, recipient routing through
//! `RecipientClassifier`.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{GroupKeyEnvelope, RecipientKind};

/// Remote error code the service uses for "no group key registered".
pub const NOT_REGISTERED_CODE: i32 = 5;

/// Errors reported by the key directory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// No group key is registered for the group yet
    #[error("group key not registered: {0}")]
    NotRegistered(String),

    /// Peer does not take part in E2EE
    #[error("peer does not support E2EE: {0}")]
    UnsupportedPeer(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
}

impl NetworkError {
    /// Map a remote error code to the structural variant where one exists.
    pub fn from_remote(code: i32, subject: &str, message: impl Into<String>) -> Self {
        if code == NOT_REGISTERED_CODE {
            NetworkError::NotRegistered(subject.to_string())
        } else {
            NetworkError::Remote {
                code,
                message: message.into(),
            }
        }
    }
}

/// Public key information the service reports for a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerKeyInfo {
    /// -1 when the peer has E2EE disabled
    pub spec_version: i32,
    pub key_id: i32,
    pub key_data: Vec<u8>,
}

/// Key directory of the chat service.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Fetch the current public key of a direct peer.
    async fn fetch_peer_public_key(&self, peer_id: &str) -> Result<PeerKeyInfo, NetworkError>;

    /// Fetch this account's wrapping of the latest group key.
    ///
    /// Fails with `NetworkError::NotRegistered` when the group has no key yet.
    async fn fetch_group_key_envelope(
        &self,
        kind: i32,
        group_id: &str,
    ) -> Result<GroupKeyEnvelope, NetworkError>;

    /// Create and register a group key for every member, returning this
    /// account's wrapping of it.
    async fn register_group_key(&self, group_id: &str) -> Result<GroupKeyEnvelope, NetworkError>;
}

/// Maps a mid to its recipient kind.
pub trait RecipientClassifier: Send + Sync {
    fn classify(&self, mid: &str) -> Option<RecipientKind>;
}

/// Classifies by the leading character of the mid: `u` user, `c` group, `r` room.
#[derive(Debug, Clone, Copy, Default)]
pub struct MidPrefixClassifier;

impl RecipientClassifier for MidPrefixClassifier {
    fn classify(&self, mid: &str) -> Option<RecipientKind> {
        match mid.chars().next()? {
            'u' => Some(RecipientKind::Individual),
            'c' => Some(RecipientKind::Group),
            'r' => Some(RecipientKind::Room),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_classifier() {
        let c = MidPrefixClassifier;
        assert_eq!(c.classify("u0123"), Some(RecipientKind::Individual));
        assert_eq!(c.classify("cabcd"), Some(RecipientKind::Group));
        assert_eq!(c.classify("r9"), Some(RecipientKind::Room));
        assert_eq!(c.classify("x1"), None);
        assert_eq!(c.classify(""), None);
    }

    #[test]
    fn test_remote_code_mapping() {
        assert_eq!(
            NetworkError::from_remote(5, "c1", "not found"),
            NetworkError::NotRegistered("c1".to_string())
        );
        assert!(matches!(
            NetworkError::from_remote(10, "c1", "boom"),
            NetworkError::Remote { code: 10, .. }
        ));
    }
}
