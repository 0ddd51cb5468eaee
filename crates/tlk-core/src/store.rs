//! Storage abstraction for E2EE key material.
//!
//! This module defines the `KeyStore` trait and provides an in-memory
//! implementation. Records are kept as JSON documents inside the byte values
//! so every backend stores the same shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store writes.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// Namespaces
// ============================================================================

/// Disjoint key spaces of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Local identity key pairs
    SelfKeys,
    /// Cached public keys of direct peers
    PeerPublicKeys,
    /// Cached unwrapped group keys
    GroupSharedKeys,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::SelfKeys => "self_keys",
            Namespace::PeerPublicKeys => "peer_public_keys",
            Namespace::GroupSharedKeys => "group_shared_keys",
        }
    }
}

/// Store key of a peer public key, scoped by key id.
pub fn peer_key_name(peer_id: &str, key_id: i32) -> String {
    format!("{}:key_id_{}", peer_id, key_id)
}

/// Store key of a self key pair addressed by key id.
pub fn self_key_id_name(key_id: i32) -> String {
    format!("key_id_{}", key_id)
}

// ============================================================================
// Store Trait
// ============================================================================

/// Byte-level key/value storage for key material.
///
/// Lookups never fail: a backend that cannot read a value logs the failure
/// and reports the value as absent. Writes report failures as `StoreError`.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch the value stored under `(namespace, key)`.
    async fn get(&self, namespace: Namespace, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `(namespace, key)`, replacing any previous value.
    async fn put(&self, namespace: Namespace, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove the value under `(namespace, key)`. Removing a missing key succeeds.
    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// Thread-safe in-memory store.
///
/// Uses `RwLock` for concurrent access with multiple readers or single writer.
#[derive(Default, Clone)]
pub struct InMemoryKeyStore {
    entries: Arc<RwLock<HashMap<(Namespace, String), Vec<u8>>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of values stored in `namespace`.
    pub async fn count(&self, namespace: Namespace) -> usize {
        let entries = self.entries.read().await;
        entries.keys().filter(|(ns, _)| *ns == namespace).count()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().await;
        entries.get(&(namespace, key.to_string())).cloned()
    }

    async fn put(&self, namespace: Namespace, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert((namespace, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(&(namespace, key.to_string()));
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Load and deserialize a record. Undecodable values count as absent.
pub async fn load_record<T: DeserializeOwned>(
    store: &dyn KeyStore,
    namespace: Namespace,
    key: &str,
) -> Option<T> {
    let bytes = store.get(namespace, key).await?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(namespace = namespace.as_str(), key, error = %e, "Discarding undecodable record");
            None
        }
    }
}

/// Serialize and store a record.
pub async fn save_record<T: Serialize>(
    store: &dyn KeyStore,
    namespace: Namespace,
    key: &str,
    record: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.put(namespace, key, bytes).await
}

// ============================================================================
// Unit Tests
// ============================================================================
