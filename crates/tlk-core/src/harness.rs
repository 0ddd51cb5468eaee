//! Test harness for TLK core.
//!
//! `KeyServer` is an in-memory stand-in for the service's key directory:
//! it knows every account's identity key, creates and wraps group keys on
//! registration, and counts the calls it receives. `KeyServerClient` is the
//! `KeyDirectory` one account sees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tlk_crypto::agreement::KeyPair;

use crate::config::E2eeConfig;
use crate::directory::{KeyDirectory, NetworkError, PeerKeyInfo};
use crate::engine::E2eeEngine;
use crate::errors::E2eeError;
use crate::group_keys::seal_group_key;
use crate::keychain::{CodecError, CodecValue, StructCodec};
use crate::keys::generate_self_key;
use crate::store::InMemoryKeyStore;
use crate::types::{GroupKeyEnvelope, SelfKeyRecord};

/// `StructCodec` that serializes the value tree as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStructCodec;

impl StructCodec for JsonStructCodec {
    fn decode(&self, bytes: &[u8]) -> Result<CodecValue, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn encode(&self, value: &CodecValue) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// Call counters of a `KeyServer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub peer_key_fetches: usize,
    pub envelope_fetches: usize,
    pub registrations: usize,
}

#[derive(Default)]
struct Counters {
    peer_key_fetches: AtomicUsize,
    envelope_fetches: AtomicUsize,
    registrations: AtomicUsize,
}

struct UserEntry {
    key: SelfKeyRecord,
    spec_version: i32,
}

struct GroupKeyState {
    key_id: i32,
    envelopes: HashMap<String, GroupKeyEnvelope>,
}

#[derive(Default)]
struct GroupEntry {
    members: Vec<String>,
    key: Option<GroupKeyState>,
}

#[derive(Default)]
struct ServerState {
    users: HashMap<String, UserEntry>,
    groups: HashMap<String, GroupEntry>,
    next_group_key_id: i32,
    fail_registration: bool,
}

/// In-memory key directory shared by every test account.
#[derive(Clone, Default)]
pub struct KeyServer {
    state: Arc<Mutex<ServerState>>,
    counters: Arc<Counters>,
}

impl KeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create an account with a fresh identity key. Replaces an existing one.
    pub fn register_user(&self, mid: &str, key_id: i32) -> SelfKeyRecord {
        let key = generate_self_key(mid, key_id);
        self.state().users.insert(
            mid.to_string(),
            UserEntry {
                key: key.clone(),
                spec_version: 2,
            },
        );
        key
    }

    /// Report `mid` as having E2EE disabled.
    pub fn disable_e2ee(&self, mid: &str) {
        if let Some(user) = self.state().users.get_mut(mid) {
            user.spec_version = -1;
        }
    }

    /// Report `mid` as a spec v1 client.
    pub fn set_spec_version(&self, mid: &str, spec_version: i32) {
        if let Some(user) = self.state().users.get_mut(mid) {
            user.spec_version = spec_version;
        }
    }

    /// Create a group without a registered key.
    pub fn create_group(&self, group_id: &str, members: &[&str]) {
        self.state().groups.insert(
            group_id.to_string(),
            GroupEntry {
                members: members.iter().map(|m| m.to_string()).collect(),
                key: None,
            },
        );
    }

    /// Make registrations fail with a transport error.
    pub fn fail_registrations(&self, fail: bool) {
        self.state().fail_registration = fail;
    }

    /// Replace the group key, as a member rotation on the service would.
    pub fn rotate_group_key(&self, group_id: &str, creator: &str) -> Result<i32, NetworkError> {
        let mut state = self.state();
        Self::register_locked(&mut state, group_id, creator)
    }

    /// Key id of the group's current key, if any.
    pub fn group_key_id(&self, group_id: &str) -> Option<i32> {
        self.state()
            .groups
            .get(group_id)
            .and_then(|g| g.key.as_ref().map(|k| k.key_id))
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            peer_key_fetches: self.counters.peer_key_fetches.load(Ordering::SeqCst),
            envelope_fetches: self.counters.envelope_fetches.load(Ordering::SeqCst),
            registrations: self.counters.registrations.load(Ordering::SeqCst),
        }
    }

    /// Directory as seen by `caller`.
    pub fn client(&self, caller: &str) -> KeyServerClient {
        KeyServerClient {
            server: self.clone(),
            caller: caller.to_string(),
        }
    }

    /// Register `mid` and build an engine for it over an in-memory store.
    pub async fn engine_for(
        &self,
        mid: &str,
        key_id: i32,
        config: E2eeConfig,
    ) -> Result<Arc<E2eeEngine>, E2eeError> {
        let key = self.register_user(mid, key_id);
        let engine = E2eeEngine::new(
            mid,
            config,
            InMemoryKeyStore::new_shared(),
            Arc::new(self.client(mid)),
        );
        engine.install_self_key(&key).await?;
        Ok(Arc::new(engine))
    }

    fn register_locked(
        state: &mut ServerState,
        group_id: &str,
        creator: &str,
    ) -> Result<i32, NetworkError> {
        let creator_key = state
            .users
            .get(creator)
            .map(|u| u.key.clone())
            .ok_or_else(|| NetworkError::UnsupportedPeer(creator.to_string()))?;
        let members = state
            .groups
            .get(group_id)
            .map(|g| g.members.clone())
            .ok_or_else(|| NetworkError::Remote {
                code: 404,
                message: format!("no group {}", group_id),
            })?;

        state.next_group_key_id += 1;
        let key_id = state.next_group_key_id;
        let group_pair = KeyPair::generate();

        let mut envelopes = HashMap::new();
        for member in &members {
            let Some(user) = state.users.get(member) else {
                continue;
            };
            let encrypted_shared_key = seal_group_key(
                &creator_key.private_key,
                &user.key.public_key,
                group_pair.private_key.as_slice(),
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
            envelopes.insert(
                member.clone(),
                GroupKeyEnvelope {
                    group_key_id: key_id,
                    creator_id: creator.to_string(),
                    creator_key_id: creator_key.key_id,
                    receiver_id: member.clone(),
                    receiver_key_id: user.key.key_id,
                    encrypted_shared_key,
                },
            );
        }

        if let Some(group) = state.groups.get_mut(group_id) {
            group.key = Some(GroupKeyState { key_id, envelopes });
        }
        Ok(key_id)
    }

    fn envelope_for(state: &ServerState, group_id: &str, member: &str) -> Result<GroupKeyEnvelope, NetworkError> {
        let group = state.groups.get(group_id).ok_or_else(|| NetworkError::Remote {
            code: 404,
            message: format!("no group {}", group_id),
        })?;
        let key = group
            .key
            .as_ref()
            .ok_or_else(|| NetworkError::NotRegistered(group_id.to_string()))?;
        key.envelopes.get(member).cloned().ok_or_else(|| NetworkError::Remote {
            code: 403,
            message: format!("{} is not a member of {}", member, group_id),
        })
    }
}

/// `KeyDirectory` bound to one calling account.
#[derive(Clone)]
pub struct KeyServerClient {
    server: KeyServer,
    caller: String,
}

#[async_trait]
impl KeyDirectory for KeyServerClient {
    async fn fetch_peer_public_key(&self, peer_id: &str) -> Result<PeerKeyInfo, NetworkError> {
        self.server.counters.peer_key_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.server.state();
        let user = state
            .users
            .get(peer_id)
            .ok_or_else(|| NetworkError::UnsupportedPeer(peer_id.to_string()))?;
        Ok(PeerKeyInfo {
            spec_version: user.spec_version,
            key_id: user.key.key_id,
            key_data: user.key.public_key.clone(),
        })
    }

    async fn fetch_group_key_envelope(
        &self,
        _kind: i32,
        group_id: &str,
    ) -> Result<GroupKeyEnvelope, NetworkError> {
        self.server.counters.envelope_fetches.fetch_add(1, Ordering::SeqCst);
        KeyServer::envelope_for(&self.server.state(), group_id, &self.caller)
    }

    async fn register_group_key(&self, group_id: &str) -> Result<GroupKeyEnvelope, NetworkError> {
        self.server.counters.registrations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.server.state();
        if state.fail_registration {
            return Err(NetworkError::Transport("registration refused".to_string()));
        }
        KeyServer::register_locked(&mut state, group_id, &self.caller)?;
        KeyServer::envelope_for(&state, group_id, &self.caller)
    }
}
