//! Typed view of E2EE wire messages.
//!
//! `RawMessage` mirrors the field-indexed service message with every field
//! optional. `E2eeMessage` is the validated form the cipher works on.

use std::collections::HashMap;

use tlk_crypto::varint::KeyIdEncoding;

use crate::errors::E2eeError;
use crate::types::RecipientKind;

pub const CONTENT_TYPE_TEXT: i32 = 0;
pub const CONTENT_TYPE_LOCATION: i32 = 15;

/// Metadata key naming the spec version of an encrypted message.
pub const E2EE_VERSION_KEY: &str = "e2eeVersion";

/// Number of chunks in an encrypted message.
pub const CHUNK_COUNT: usize = 5;

/// E2EE message format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecVersion {
    /// AES-CBC, unauthenticated
    V1,
    /// AES-GCM with AAD
    V2,
}

impl SpecVersion {
    pub fn from_i32(v: i32) -> Result<Self, E2eeError> {
        match v {
            1 => Ok(SpecVersion::V1),
            2 => Ok(SpecVersion::V2),
            other => Err(E2eeError::UnsupportedSpecVersion(other.to_string())),
        }
    }

    /// Read `e2eeVersion` from content metadata, defaulting to 2.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self, E2eeError> {
        match metadata.get(E2EE_VERSION_KEY).map(String::as_str) {
            None | Some("2") => Ok(SpecVersion::V2),
            Some("1") => Ok(SpecVersion::V1),
            Some(other) => Err(E2eeError::UnsupportedSpecVersion(other.to_string())),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            SpecVersion::V1 => 1,
            SpecVersion::V2 => 2,
        }
    }

    pub fn as_metadata(self) -> String {
        self.as_u32().to_string()
    }
}

/// Service message as received, fields keyed by their wire index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// 1
    pub from: Option<String>,
    /// 2
    pub to: Option<String>,
    /// 3
    pub to_type: Option<i32>,
    /// 15
    pub content_type: Option<i32>,
    /// 18
    pub content_metadata: Option<HashMap<String, String>>,
    /// 20
    pub chunks: Option<Vec<Vec<u8>>>,
}

impl RawMessage {
    /// Build the service message carrying an encrypted envelope.
    pub fn outgoing(
        from: &str,
        to: &str,
        kind: RecipientKind,
        content_type: i32,
        spec_version: SpecVersion,
        envelope: EncryptedEnvelope,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(E2EE_VERSION_KEY.to_string(), spec_version.as_metadata());
        Self {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            to_type: Some(kind.to_wire()),
            content_type: Some(content_type),
            content_metadata: Some(metadata),
            chunks: Some(envelope.into_chunks()),
        }
    }
}

/// Validated incoming E2EE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E2eeMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub recipient_kind: RecipientKind,
    pub content_type: i32,
    pub spec_version: SpecVersion,
    pub envelope: EncryptedEnvelope,
}

impl TryFrom<RawMessage> for E2eeMessage {
    type Error = E2eeError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let sender_id = raw.from.ok_or_else(|| E2eeError::malformed("missing sender (field 1)"))?;
        let recipient_id = raw.to.ok_or_else(|| E2eeError::malformed("missing recipient (field 2)"))?;
        let to_type = raw
            .to_type
            .ok_or_else(|| E2eeError::malformed("missing recipient kind (field 3)"))?;
        let recipient_kind = RecipientKind::from_wire(to_type)
            .ok_or_else(|| E2eeError::UnsupportedRecipient(format!("recipient kind {}", to_type)))?;
        let spec_version = match &raw.content_metadata {
            Some(metadata) => SpecVersion::from_metadata(metadata)?,
            None => SpecVersion::V2,
        };
        let content_type = raw
            .content_type
            .ok_or_else(|| E2eeError::malformed("missing content type (field 15)"))?;
        let chunks = raw.chunks.ok_or_else(|| E2eeError::malformed("missing chunks (field 20)"))?;

        Ok(Self {
            sender_id,
            recipient_id,
            recipient_kind,
            content_type,
            spec_version,
            envelope: EncryptedEnvelope::from_chunks(chunks)?,
        })
    }
}

/// The five-chunk body of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub salt: [u8; 16],
    /// Ciphertext; for spec v2 the 16-byte tag is appended
    pub ciphertext: Vec<u8>,
    /// GCM nonce for spec v2, random filler for spec v1
    pub nonce: [u8; 16],
    pub sender_key_id: Vec<u8>,
    pub receiver_key_id: Vec<u8>,
}

impl EncryptedEnvelope {
    pub fn into_chunks(self) -> Vec<Vec<u8>> {
        vec![
            self.salt.to_vec(),
            self.ciphertext,
            self.nonce.to_vec(),
            self.sender_key_id,
            self.receiver_key_id,
        ]
    }

    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Result<Self, E2eeError> {
        if chunks.len() != CHUNK_COUNT {
            return Err(E2eeError::malformed(format!(
                "expected {} chunks, got {}",
                CHUNK_COUNT,
                chunks.len()
            )));
        }
        let mut it = chunks.into_iter();
        let mut next = || it.next().unwrap_or_default();

        let salt = fixed_chunk(next(), "salt")?;
        let ciphertext = next();
        let nonce = fixed_chunk(next(), "nonce")?;
        let sender_key_id = next();
        let receiver_key_id = next();

        Ok(Self {
            salt,
            ciphertext,
            nonce,
            sender_key_id,
            receiver_key_id,
        })
    }

    /// Decode `(sender_key_id, receiver_key_id)`.
    pub fn key_ids(&self, encoding: KeyIdEncoding) -> Result<(i32, i32), E2eeError> {
        let sender = encoding
            .decode(&self.sender_key_id)
            .map_err(|e| E2eeError::malformed(format!("sender key id: {}", e)))?;
        let receiver = encoding
            .decode(&self.receiver_key_id)
            .map_err(|e| E2eeError::malformed(format!("receiver key id: {}", e)))?;
        Ok((sender, receiver))
    }
}

fn fixed_chunk(chunk: Vec<u8>, name: &str) -> Result<[u8; 16], E2eeError> {
    let len = chunk.len();
    chunk
        .try_into()
        .map_err(|_| E2eeError::malformed(format!("{} must be 16 bytes, got {}", name, len)))
}
