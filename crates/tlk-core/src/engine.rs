//! The E2EE engine.
//!
//! `E2eeEngine` owns the key resolvers of one account and exposes message
//! encryption, decryption and key provisioning. It is `Send + Sync` and meant
//! to be shared through an `Arc`.

use std::sync::Arc;

use tlk_crypto::agreement::{shared_secret, KeyPair};
use tlk_crypto::varint::KeyIdEncoding;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher::{open_v1, open_v2, seal_v1, seal_v2, OpenContext, Payload, SealContext};
use crate::config::{E2eeConfig, LegacyPolicy};
use crate::directory::{KeyDirectory, MidPrefixClassifier, RecipientClassifier};
use crate::errors::E2eeError;
use crate::group_keys::GroupKeyResolver;
use crate::keychain::{decrypt_keychain, encrypt_device_secret, StructCodec};
use crate::keys::{load_active_self_key, load_self_key, save_self_key};
use crate::locks::KeyLocks;
use crate::message::{E2eeMessage, EncryptedEnvelope, RawMessage, SpecVersion};
use crate::peer_keys::PeerKeyResolver;
use crate::store::KeyStore;
use crate::types::{Authenticity, RecipientKind, SelfKeyRecord};

/// Result of decrypting a message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMessage {
    pub payload: Payload,
    pub authenticity: Authenticity,
    pub spec_version: SpecVersion,
}

/// An encrypted message body and the routing facts needed to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub envelope: EncryptedEnvelope,
    pub recipient_kind: RecipientKind,
    pub spec_version: SpecVersion,
}

pub struct E2eeEngine {
    owner_id: String,
    config: E2eeConfig,
    store: Arc<dyn KeyStore>,
    classifier: Arc<dyn RecipientClassifier>,
    peers: Arc<PeerKeyResolver>,
    groups: GroupKeyResolver,
}

impl E2eeEngine {
    pub fn new(
        owner_id: impl Into<String>,
        config: E2eeConfig,
        store: Arc<dyn KeyStore>,
        directory: Arc<dyn KeyDirectory>,
    ) -> Self {
        let owner_id = owner_id.into();
        let locks = Arc::new(KeyLocks::new());
        let peers = Arc::new(PeerKeyResolver::new(store.clone(), directory.clone(), locks.clone()));
        let groups = GroupKeyResolver::new(
            owner_id.clone(),
            config.group_key_kind,
            store.clone(),
            directory,
            peers.clone(),
            locks,
        );

        Self {
            owner_id,
            config,
            store,
            classifier: Arc::new(MidPrefixClassifier),
            peers,
            groups,
        }
    }

    /// Replace the default mid-prefix classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn RecipientClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn config(&self) -> &E2eeConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Provisioning
    // -------------------------------------------------------------------------

    /// Install `record` as this account's active self key.
    pub async fn install_self_key(&self, record: &SelfKeyRecord) -> Result<(), E2eeError> {
        if record.owner_id != self.owner_id {
            return Err(E2eeError::SelfKeyUnavailable(format!(
                "key belongs to {}, engine owner is {}",
                record.owner_id, self.owner_id
            )));
        }
        let derived = KeyPair::from_private(&record.private_key)?;
        if derived.public_key.as_slice() != record.public_key.as_slice() {
            return Err(E2eeError::SelfKeyUnavailable(
                "public key does not match private key".to_string(),
            ));
        }

        save_self_key(self.store.as_ref(), record).await?;
        info!(owner = %self.owner_id, key_id = record.key_id, "Installed self key");
        Ok(())
    }

    /// Decrypt a keychain and install the key pair it carries.
    ///
    /// `fallback_key_id` is used when the keychain entry names no key id.
    pub async fn provision_from_keychain(
        &self,
        codec: &dyn StructCodec,
        server_public: &[u8],
        device_private: &[u8],
        encrypted_keychain: &[u8],
        fallback_key_id: i32,
    ) -> Result<SelfKeyRecord, E2eeError> {
        let keys = decrypt_keychain(codec, server_public, device_private, encrypted_keychain)?;
        let record = SelfKeyRecord {
            owner_id: self.owner_id.clone(),
            key_id: keys.key_id.unwrap_or(fallback_key_id),
            public_key: keys.public_key.clone(),
            private_key: keys.private_key.to_vec(),
        };
        self.install_self_key(&record).await?;
        Ok(record)
    }

    /// Keychain possession proof for `data`.
    pub fn device_secret(
        &self,
        server_public: &[u8],
        device_private: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>, E2eeError> {
        encrypt_device_secret(server_public, device_private, data)
    }

    pub async fn active_self_key(&self) -> Result<SelfKeyRecord, E2eeError> {
        load_active_self_key(self.store.as_ref(), &self.owner_id)
            .await
            .ok_or_else(|| E2eeError::SelfKeyUnavailable(format!("no active key for {}", self.owner_id)))
    }

    async fn self_key(&self, key_id: i32) -> Result<SelfKeyRecord, E2eeError> {
        load_self_key(self.store.as_ref(), key_id)
            .await
            .ok_or_else(|| E2eeError::SelfKeyUnavailable(format!("key id {}", key_id)))
    }

    // -------------------------------------------------------------------------
    // Encryption
    // -------------------------------------------------------------------------

    /// Encrypt `payload` for `recipient`.
    ///
    /// Direct messages use the spec version the peer reports; `spec_version`
    /// only applies to groups and rooms and defaults to the configured one.
    pub async fn encrypt_message(
        &self,
        recipient: &str,
        payload: &Payload,
        content_type: i32,
        spec_version: Option<SpecVersion>,
        compact: bool,
    ) -> Result<EncryptedEnvelope, E2eeError> {
        Ok(self.seal(recipient, payload, content_type, spec_version, compact).await?.envelope)
    }

    /// Encrypt `payload` and wrap it into an outgoing service message.
    pub async fn encrypt_to_message(
        &self,
        recipient: &str,
        payload: &Payload,
        spec_version: Option<SpecVersion>,
        compact: bool,
    ) -> Result<RawMessage, E2eeError> {
        let content_type = payload.content_type();
        let sealed = self.seal(recipient, payload, content_type, spec_version, compact).await?;
        Ok(RawMessage::outgoing(
            &self.owner_id,
            recipient,
            sealed.recipient_kind,
            content_type,
            sealed.spec_version,
            sealed.envelope,
        ))
    }

    /// Encrypt and report the recipient kind and spec version used.
    pub async fn seal(
        &self,
        recipient: &str,
        payload: &Payload,
        content_type: i32,
        spec_version: Option<SpecVersion>,
        compact: bool,
    ) -> Result<SealedMessage, E2eeError> {
        let kind = self
            .classifier
            .classify(recipient)
            .ok_or_else(|| E2eeError::UnsupportedRecipient(recipient.to_string()))?;
        let self_key = self.active_self_key().await?;

        let (shared, receiver_key_id, version) = if kind.uses_group_key() {
            let group = self.groups.resolve(recipient, None).await?;
            let shared = shared_secret(&group.private_key, &self_key.public_key)?;
            let version = match spec_version {
                Some(v) => v,
                None => SpecVersion::from_i32(self.config.default_spec_version)?,
            };
            (shared, group.key_id, version)
        } else {
            let peer = self.peers.negotiate(recipient).await?;
            let shared = shared_secret(&self_key.private_key, &peer.record.public_key)?;
            (shared, peer.record.key_id, peer.spec_version)
        };

        let ctx = SealContext {
            recipient_id: recipient,
            sender_id: &self.owner_id,
            sender_key_id: self_key.key_id,
            receiver_key_id,
            content_type,
            key_id_encoding: KeyIdEncoding::from_compact_flag(compact),
        };

        let envelope = match version {
            SpecVersion::V2 => seal_v2(shared.as_slice(), &ctx, payload)?,
            SpecVersion::V1 => {
                if self.config.legacy_policy == LegacyPolicy::Reject {
                    return Err(E2eeError::LegacyRejected);
                }
                warn!(recipient = %recipient, "Sending unauthenticated spec v1 message");
                seal_v1(shared.as_slice(), &ctx, payload)?
            }
        };

        debug!(
            recipient = %recipient,
            ?kind,
            sender_key_id = self_key.key_id,
            receiver_key_id,
            receiver_key_id_hex = %hex::encode(&envelope.receiver_key_id),
            "Encrypted message"
        );
        Ok(SealedMessage {
            envelope,
            recipient_kind: kind,
            spec_version: version,
        })
    }

    // -------------------------------------------------------------------------
    // Decryption
    // -------------------------------------------------------------------------

    /// Decrypt a received (or, with `view_as_self`, a self-sent) message.
    pub async fn decrypt_message(
        &self,
        raw: RawMessage,
        view_as_self: bool,
    ) -> Result<DecryptedMessage, E2eeError> {
        let message = E2eeMessage::try_from(raw)?;
        if message.spec_version == SpecVersion::V1 && self.config.legacy_policy == LegacyPolicy::Reject {
            warn!(sender = %message.sender_id, "Rejecting spec v1 message");
            return Err(E2eeError::LegacyRejected);
        }

        let (sender_key_id, receiver_key_id) =
            message.envelope.key_ids(self.config.key_id_encoding())?;

        let shared = if message.recipient_kind.uses_group_key() {
            self.group_secret(&message, sender_key_id, receiver_key_id).await?
        } else {
            self.direct_secret(&message, sender_key_id, receiver_key_id, view_as_self).await?
        };

        let (payload, authenticity) = match message.spec_version {
            SpecVersion::V2 => {
                let ctx = OpenContext {
                    recipient_id: &message.recipient_id,
                    sender_id: &message.sender_id,
                    sender_key_id,
                    receiver_key_id,
                    content_type: message.content_type,
                };
                (open_v2(shared.as_slice(), &ctx, &message.envelope)?, Authenticity::Authenticated)
            }
            SpecVersion::V1 => {
                warn!(sender = %message.sender_id, "Decrypted unauthenticated spec v1 message");
                (
                    open_v1(shared.as_slice(), message.content_type, &message.envelope)?,
                    Authenticity::Unauthenticated,
                )
            }
        };

        Ok(DecryptedMessage {
            payload,
            authenticity,
            spec_version: message.spec_version,
        })
    }

    async fn direct_secret(
        &self,
        message: &E2eeMessage,
        sender_key_id: i32,
        receiver_key_id: i32,
        view_as_self: bool,
    ) -> Result<Zeroizing<[u8; 32]>, E2eeError> {
        // Our side of the conversation and the peer's
        let (own_key_id, peer_id, peer_key_id) = if view_as_self {
            (sender_key_id, message.recipient_id.as_str(), receiver_key_id)
        } else {
            (receiver_key_id, message.sender_id.as_str(), sender_key_id)
        };

        let self_key = self.self_key(own_key_id).await?;
        let peer = self.peers.public_key(peer_id, peer_key_id).await?;
        Ok(shared_secret(&self_key.private_key, &peer.public_key)?)
    }

    async fn group_secret(
        &self,
        message: &E2eeMessage,
        sender_key_id: i32,
        receiver_key_id: i32,
    ) -> Result<Zeroizing<[u8; 32]>, E2eeError> {
        let group = self.groups.resolve(&message.recipient_id, Some(receiver_key_id)).await?;

        let sender_public = if message.sender_id == self.owner_id {
            self.self_key(sender_key_id).await?.public_key.clone()
        } else {
            self.peers
                .public_key(&message.sender_id, sender_key_id)
                .await?
                .public_key
        };
        Ok(shared_secret(&group.private_key, &sender_public)?)
    }
}
