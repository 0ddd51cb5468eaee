//! Direct-peer public key resolution.
//!
//! Peer public keys are cached per (peer, key id) and never change once
//! stored. A miss asks the key directory for the peer's current key; if the
//! server reports a different key id than the one a message names, the
//! lookup fails instead of caching the wrong key under that id.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::directory::{KeyDirectory, NetworkError, PeerKeyInfo};
use crate::errors::E2eeError;
use crate::locks::KeyLocks;
use crate::message::SpecVersion;
use crate::store::{load_record, peer_key_name, save_record, KeyStore, Namespace};
use crate::types::PeerPublicKeyRecord;

/// Spec version the service reports for peers without E2EE.
pub const SPEC_VERSION_UNSUPPORTED: i32 = -1;

/// Result of negotiating with a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedPeer {
    pub record: PeerPublicKeyRecord,
    pub spec_version: SpecVersion,
}

pub struct PeerKeyResolver {
    store: Arc<dyn KeyStore>,
    directory: Arc<dyn KeyDirectory>,
    locks: Arc<KeyLocks>,
}

impl PeerKeyResolver {
    pub fn new(store: Arc<dyn KeyStore>, directory: Arc<dyn KeyDirectory>, locks: Arc<KeyLocks>) -> Self {
        Self { store, directory, locks }
    }

    async fn fetch(&self, peer_id: &str) -> Result<PeerKeyInfo, E2eeError> {
        let info = self.directory.fetch_peer_public_key(peer_id).await.map_err(|e| match e {
            NetworkError::UnsupportedPeer(peer) => E2eeError::UnsupportedRecipient(peer),
            other => E2eeError::Network(other),
        })?;

        if info.spec_version == SPEC_VERSION_UNSUPPORTED {
            warn!(peer = %peer_id, "Peer does not support E2EE");
            return Err(E2eeError::UnsupportedRecipient(peer_id.to_string()));
        }
        Ok(info)
    }

    async fn cache(&self, record: &PeerPublicKeyRecord) -> Result<(), E2eeError> {
        let name = peer_key_name(&record.peer_id, record.key_id);
        save_record(self.store.as_ref(), Namespace::PeerPublicKeys, &name, record).await?;
        Ok(())
    }

    /// Ask the directory for the peer's current key and spec version.
    ///
    /// Used when sending: the current key is always what the peer expects.
    /// The returned key is cached for later decryption.
    pub async fn negotiate(&self, peer_id: &str) -> Result<NegotiatedPeer, E2eeError> {
        let info = self.fetch(peer_id).await?;
        let spec_version = SpecVersion::from_i32(info.spec_version)?;
        let record = PeerPublicKeyRecord {
            peer_id: peer_id.to_string(),
            key_id: info.key_id,
            public_key: info.key_data,
        };

        let name = peer_key_name(peer_id, record.key_id);
        let _guard = self.locks.acquire(Namespace::PeerPublicKeys, &name).await;
        if load_record::<PeerPublicKeyRecord>(self.store.as_ref(), Namespace::PeerPublicKeys, &name)
            .await
            .is_none()
        {
            self.cache(&record).await?;
        }

        debug!(peer = %peer_id, key_id = record.key_id, ?spec_version, "Negotiated peer key");
        Ok(NegotiatedPeer { record, spec_version })
    }

    /// Public key of `peer_id` with exactly `key_id`.
    pub async fn public_key(&self, peer_id: &str, key_id: i32) -> Result<PeerPublicKeyRecord, E2eeError> {
        let name = peer_key_name(peer_id, key_id);
        let _guard = self.locks.acquire(Namespace::PeerPublicKeys, &name).await;

        if let Some(record) = load_record(self.store.as_ref(), Namespace::PeerPublicKeys, &name).await {
            return Ok(record);
        }

        debug!(peer = %peer_id, key_id, "Peer key not cached, fetching");
        let info = self.fetch(peer_id).await?;
        if info.key_id != key_id {
            warn!(peer = %peer_id, requested = key_id, actual = info.key_id, "Peer key id mismatch");
            return Err(E2eeError::KeyMismatch {
                subject: peer_id.to_string(),
                requested: key_id,
                actual: info.key_id,
            });
        }

        let record = PeerPublicKeyRecord {
            peer_id: peer_id.to_string(),
            key_id,
            public_key: info.key_data,
        };
        self.cache(&record).await?;
        Ok(record)
    }
}
