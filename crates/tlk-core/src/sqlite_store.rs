//! SQLite-based persistent key storage.
//!
//! All namespaces share one `key_cache` table. The schema is versioned so
//! later migrations can be appended.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::warn;

use crate::store::{KeyStore, Namespace, StoreError};

/// Current schema version for migrations.
/// Increment this when adding new migrations.
#[allow(dead_code)]
const SCHEMA_VERSION: i32 = 1;

/// SQLite-based persistent key store.
pub struct SqliteKeyStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::OperationFailed(format!("failed to open database: {}", e))
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StoreError::OperationFailed(format!("failed to set pragmas: {}", e)))?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory SQLite store for testing.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::OperationFailed(format!("failed to open in-memory database: {}", e))
        })?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to create schema_version: {}", e)))?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::OperationFailed(format!("failed to read schema_version: {}", e)))?;

        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }

        Ok(())
    }

    /// Migration to schema version 1 - initial schema.
    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS key_cache (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| StoreError::OperationFailed(format!("migration v1 failed: {}", e)))?;

        Ok(())
    }

    /// Schema version recorded in the database.
    pub async fn schema_version(&self) -> Result<i32, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })
        .map_err(|e| StoreError::OperationFailed(e.to_string()))
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Option<Vec<u8>> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT value FROM key_cache WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional();

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(namespace = namespace.as_str(), key, error = %e, "Key cache lookup failed");
                None
            }
        }
    }

    async fn put(&self, namespace: Namespace, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO key_cache (namespace, key, value) VALUES (?1, ?2, ?3)",
            params![namespace.as_str(), key, value],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to store key: {}", e)))?;
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM key_cache WHERE namespace = ?1 AND key = ?2",
            params![namespace.as_str(), key],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to remove key: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{load_record, save_record};
    use crate::types::GroupSharedKeyRecord;

    #[tokio::test]
    async fn test_migration_sets_version() {
        let store = SqliteKeyStore::new_in_memory().unwrap();
        assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = SqliteKeyStore::new_in_memory().unwrap();
        store.put(Namespace::PeerPublicKeys, "u1:key_id_1", vec![1, 2]).await.unwrap();
        store.put(Namespace::PeerPublicKeys, "u1:key_id_1", vec![3, 4]).await.unwrap();

        assert_eq!(store.get(Namespace::PeerPublicKeys, "u1:key_id_1").await, Some(vec![3, 4]));
        assert_eq!(store.get(Namespace::SelfKeys, "u1:key_id_1").await, None);

        store.remove(Namespace::PeerPublicKeys, "u1:key_id_1").await.unwrap();
        assert_eq!(store.get(Namespace::PeerPublicKeys, "u1:key_id_1").await, None);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");

        {
            let store = SqliteKeyStore::new(&path).unwrap();
            let record = GroupSharedKeyRecord {
                group_id: "c1".to_string(),
                key_id: 5,
                private_key: vec![7u8; 32],
            };
            save_record(&store, Namespace::GroupSharedKeys, "c1", &record).await.unwrap();
        }

        let store = SqliteKeyStore::new(&path).unwrap();
        assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
        let loaded: GroupSharedKeyRecord =
            load_record(&store, Namespace::GroupSharedKeys, "c1").await.unwrap();
        assert_eq!(loaded.key_id, 5);
        assert_eq!(loaded.private_key, vec![7u8; 32]);
    }
}
