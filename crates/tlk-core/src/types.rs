use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Routing class of a recipient mid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientKind {
    Individual,
    Group,
    Room,
}

impl RecipientKind {
    /// Wire value of the recipient-kind field (0 user, 1 room, 2 group).
    pub fn from_wire(v: i32) -> Option<Self> {
        match v {
            0 => Some(RecipientKind::Individual),
            1 => Some(RecipientKind::Room),
            2 => Some(RecipientKind::Group),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            RecipientKind::Individual => 0,
            RecipientKind::Room => 1,
            RecipientKind::Group => 2,
        }
    }

    /// Groups and rooms share one key per conversation.
    pub fn uses_group_key(self) -> bool {
        !matches!(self, RecipientKind::Individual)
    }
}

/// Long-term identity key pair of the local account.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SelfKeyRecord {
    #[zeroize(skip)]
    pub owner_id: String,
    #[zeroize(skip)]
    pub key_id: i32,
    #[zeroize(skip)]
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for SelfKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfKeyRecord")
            .field("owner_id", &self.owner_id)
            .field("key_id", &self.key_id)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Cached public key of a direct peer, immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPublicKeyRecord {
    pub peer_id: String,
    pub key_id: i32,
    pub public_key: Vec<u8>,
}

/// Unwrapped group private key, cached per group.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct GroupSharedKeyRecord {
    #[zeroize(skip)]
    pub group_id: String,
    #[zeroize(skip)]
    pub key_id: i32,
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for GroupSharedKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupSharedKeyRecord")
            .field("group_id", &self.group_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Server-provided wrapping of a group key for one member. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupKeyEnvelope {
    pub group_key_id: i32,
    pub creator_id: String,
    pub creator_key_id: i32,
    pub receiver_id: String,
    pub receiver_key_id: i32,
    pub encrypted_shared_key: Vec<u8>,
}

/// Whether a decrypted payload was covered by an authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authenticity {
    /// Spec v2: AES-GCM tag verified over payload and AAD
    Authenticated,
    /// Spec v1: AES-CBC only, content and metadata may have been altered
    Unauthenticated,
}
