use tlk_crypto::agreement::KeyPair;
use tracing::debug;

use crate::store::{load_record, save_record, self_key_id_name, KeyStore, Namespace, StoreError};
use crate::types::SelfKeyRecord;

/// Generate a fresh self key pair. (Keychain provisioning replaces it with the server's pair.)
pub fn generate_self_key(owner_id: &str, key_id: i32) -> SelfKeyRecord {
    let pair = KeyPair::generate();
    SelfKeyRecord {
        owner_id: owner_id.to_string(),
        key_id,
        public_key: pair.public_key.to_vec(),
        private_key: pair.private_key.to_vec(),
    }
}

/// Persist `record` as the active self key and under its key id.
pub async fn save_self_key(store: &dyn KeyStore, record: &SelfKeyRecord) -> Result<(), StoreError> {
    save_record(store, Namespace::SelfKeys, &record.owner_id, record).await?;
    save_record(store, Namespace::SelfKeys, &self_key_id_name(record.key_id), record).await?;
    debug!(owner = %record.owner_id, key_id = record.key_id, "Stored self key");
    Ok(())
}

/// Active self key of `owner_id`.
pub async fn load_active_self_key(store: &dyn KeyStore, owner_id: &str) -> Option<SelfKeyRecord> {
    load_record(store, Namespace::SelfKeys, owner_id).await
}

/// Self key with the given key id, active or not.
pub async fn load_self_key(store: &dyn KeyStore, key_id: i32) -> Option<SelfKeyRecord> {
    load_record(store, Namespace::SelfKeys, &self_key_id_name(key_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKeyStore;

    #[tokio::test]
    async fn test_saved_key_is_found_both_ways() {
        let store = InMemoryKeyStore::new();
        let record = generate_self_key("uself", 11);
        save_self_key(&store, &record).await.unwrap();

        let active = load_active_self_key(&store, "uself").await.unwrap();
        let by_id = load_self_key(&store, 11).await.unwrap();
        assert_eq!(active.public_key, record.public_key);
        assert_eq!(by_id.private_key, record.private_key);
        assert!(load_self_key(&store, 12).await.is_none());
    }

    #[tokio::test]
    async fn test_reprovision_keeps_old_key_id() {
        let store = InMemoryKeyStore::new();
        let old = generate_self_key("uself", 1);
        let new = generate_self_key("uself", 2);
        save_self_key(&store, &old).await.unwrap();
        save_self_key(&store, &new).await.unwrap();

        assert_eq!(load_active_self_key(&store, "uself").await.unwrap().key_id, 2);
        assert_eq!(load_self_key(&store, 1).await.unwrap().public_key, old.public_key);
    }

    #[test]
    fn test_generated_key_is_consistent() {
        let record = generate_self_key("uself", 1);
        let rebuilt = KeyPair::from_private(&record.private_key).unwrap();
        assert_eq!(rebuilt.public_key.to_vec(), record.public_key);
    }
}
