//! Group shared key resolution.
//!
//! Every group has one X25519 key pair whose private half the server hands
//! to each member, wrapped under the agreement between the creator's and the
//! member's identity keys. Resolution runs under the group's lock:
//!
//! 1. a cached record with the requested key id (or any, if none requested)
//!    is returned as is
//! 2. a cached record with another key id is discarded
//! 3. the envelope is fetched; if the group has no key yet, one registration
//!    is attempted, which yields the envelope instead
//! 4. the envelope is unwrapped with the self key it names and the creator's
//!    public key, and the result is cached

use std::sync::Arc;

use tlk_crypto::agreement::shared_secret;
use tlk_crypto::cipher::{cbc_decrypt, cbc_encrypt};
use tlk_crypto::kdf::SymmetricKey;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::directory::{KeyDirectory, NetworkError};
use crate::errors::E2eeError;
use crate::keys::load_self_key;
use crate::locks::KeyLocks;
use crate::peer_keys::PeerKeyResolver;
use crate::store::{load_record, save_record, KeyStore, Namespace};
use crate::types::{GroupKeyEnvelope, GroupSharedKeyRecord};

/// Kind argument of the latest-group-key request.
pub const GROUP_KEY_KIND: i32 = 2;

/// Wrap a group private key for one member.
pub fn seal_group_key(
    creator_private: &[u8],
    receiver_public: &[u8],
    group_private: &[u8],
) -> Result<Vec<u8>, E2eeError> {
    let shared = shared_secret(creator_private, receiver_public)?;
    let key = SymmetricKey::derive(shared.as_slice(), &[]);
    Ok(cbc_encrypt(key.key(), key.iv(), group_private)?)
}

/// Recover the group private key from an envelope's `encrypted_shared_key`.
pub fn unwrap_group_key(
    receiver_private: &[u8],
    creator_public: &[u8],
    encrypted_shared_key: &[u8],
) -> Result<Zeroizing<Vec<u8>>, E2eeError> {
    let shared = shared_secret(receiver_private, creator_public)?;
    let key = SymmetricKey::derive(shared.as_slice(), &[]);
    Ok(Zeroizing::new(cbc_decrypt(key.key(), key.iv(), encrypted_shared_key)?))
}

pub struct GroupKeyResolver {
    owner_id: String,
    kind: i32,
    store: Arc<dyn KeyStore>,
    directory: Arc<dyn KeyDirectory>,
    peers: Arc<PeerKeyResolver>,
    locks: Arc<KeyLocks>,
}

impl GroupKeyResolver {
    pub fn new(
        owner_id: impl Into<String>,
        kind: i32,
        store: Arc<dyn KeyStore>,
        directory: Arc<dyn KeyDirectory>,
        peers: Arc<PeerKeyResolver>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind,
            store,
            directory,
            peers,
            locks,
        }
    }

    /// Resolve the shared key of `group_id`, optionally pinned to `key_id`.
    pub async fn resolve(
        &self,
        group_id: &str,
        key_id: Option<i32>,
    ) -> Result<GroupSharedKeyRecord, E2eeError> {
        let _guard = self.locks.acquire(Namespace::GroupSharedKeys, group_id).await;

        if let Some(cached) =
            load_record::<GroupSharedKeyRecord>(self.store.as_ref(), Namespace::GroupSharedKeys, group_id)
                .await
        {
            match key_id {
                Some(requested) if requested != cached.key_id => {
                    debug!(group = %group_id, cached = cached.key_id, requested, "Discarding stale group key");
                    self.store.remove(Namespace::GroupSharedKeys, group_id).await?;
                }
                _ => return Ok(cached),
            }
        }

        let envelope = self.fetch_or_register(group_id).await?;
        let record = self.unwrap_envelope(group_id, &envelope).await?;
        save_record(self.store.as_ref(), Namespace::GroupSharedKeys, group_id, &record).await?;

        if let Some(requested) = key_id {
            if requested != record.key_id {
                warn!(group = %group_id, requested, actual = record.key_id, "Group key id mismatch");
                return Err(E2eeError::KeyMismatch {
                    subject: group_id.to_string(),
                    requested,
                    actual: record.key_id,
                });
            }
        }

        debug!(group = %group_id, key_id = record.key_id, "Resolved group key");
        Ok(record)
    }

    async fn fetch_or_register(&self, group_id: &str) -> Result<GroupKeyEnvelope, E2eeError> {
        match self.directory.fetch_group_key_envelope(self.kind, group_id).await {
            Ok(envelope) => Ok(envelope),
            Err(NetworkError::NotRegistered(_)) => {
                info!(group = %group_id, "Group key not registered, registering");
                self.directory
                    .register_group_key(group_id)
                    .await
                    .map_err(|e| match e {
                        NetworkError::NotRegistered(group) => E2eeError::KeyNotRegistered(group),
                        other => E2eeError::Network(other),
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unwrap_envelope(
        &self,
        group_id: &str,
        envelope: &GroupKeyEnvelope,
    ) -> Result<GroupSharedKeyRecord, E2eeError> {
        let self_key = load_self_key(self.store.as_ref(), envelope.receiver_key_id)
            .await
            .ok_or_else(|| {
                E2eeError::SelfKeyUnavailable(format!("key id {}", envelope.receiver_key_id))
            })?;

        // The creator may be this account, whose public key is local
        let creator_public = if envelope.creator_id == self.owner_id {
            load_self_key(self.store.as_ref(), envelope.creator_key_id)
                .await
                .map(|k| k.public_key.clone())
        } else {
            None
        };
        let creator_public = match creator_public {
            Some(public) => public,
            None => {
                self.peers
                    .public_key(&envelope.creator_id, envelope.creator_key_id)
                    .await?
                    .public_key
            }
        };

        let private_key =
            unwrap_group_key(&self_key.private_key, &creator_public, &envelope.encrypted_shared_key)?;

        Ok(GroupSharedKeyRecord {
            group_id: group_id.to_string(),
            key_id: envelope.group_key_id,
            private_key: private_key.to_vec(),
        })
    }
}
