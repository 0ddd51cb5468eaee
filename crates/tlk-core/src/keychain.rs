//! Device keychain decoding.
//!
//! The service hands a new device its long-term key pair as an AES-CBC
//! encrypted, codec-serialized structure. The wrapping key comes from the
//! X25519 agreement between a provisioning key pair and the server, with no
//! salt.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tlk_crypto::agreement::shared_secret;
use tlk_crypto::cipher::{cbc_decrypt, cbc_encrypt, ecb_encrypt};
use tlk_crypto::kdf::{derive_key, fold_digest, sha256_concat, KeyLabel, SymmetricKey};
use zeroize::Zeroizing;

use crate::errors::E2eeError;

/// Field of the keychain root holding the key list.
const FIELD_KEYS: i16 = 1;
/// Fields of a keychain entry.
const FIELD_KEY_ID: i16 = 2;
const FIELD_PUBLIC_KEY: i16 = 4;
const FIELD_PRIVATE_KEY: i16 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed structure: {0}")]
    Malformed(String),

    #[error("missing field {0}")]
    MissingField(i16),

    #[error("field {field} is not {expected}")]
    UnexpectedType { field: i16, expected: &'static str },
}

/// Decoded value of the service's field-indexed binary codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CodecValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    Double(f64),
    Binary(Vec<u8>),
    List(Vec<CodecValue>),
    Map(Vec<(CodecValue, CodecValue)>),
    Struct(BTreeMap<i16, CodecValue>),
}

impl CodecValue {
    fn field(&self, id: i16) -> Option<&CodecValue> {
        match self {
            CodecValue::Struct(fields) => fields.get(&id),
            _ => None,
        }
    }
}

/// Structured binary codec of the wire protocol.
pub trait StructCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<CodecValue, CodecError>;
    fn encode(&self, value: &CodecValue) -> Result<Vec<u8>, CodecError>;
}

/// Long-term key pair recovered from a keychain.
pub struct KeychainKeys {
    pub key_id: Option<i32>,
    pub public_key: Vec<u8>,
    pub private_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for KeychainKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainKeys")
            .field("key_id", &self.key_id)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

fn keychain_key(public_key: &[u8], private_key: &[u8]) -> Result<SymmetricKey, E2eeError> {
    let shared = shared_secret(private_key, public_key)?;
    Ok(SymmetricKey::derive(shared.as_slice(), &[]))
}

/// Decrypt and parse an encrypted keychain.
///
/// `public_key` and `private_key` are the two halves of the provisioning
/// agreement (the server's public key and the local provisioning private key).
pub fn decrypt_keychain(
    codec: &dyn StructCodec,
    public_key: &[u8],
    private_key: &[u8],
    encrypted: &[u8],
) -> Result<KeychainKeys, E2eeError> {
    let key = keychain_key(public_key, private_key)?;
    let plaintext = Zeroizing::new(cbc_decrypt(key.key(), key.iv(), encrypted)?);
    let root = codec.decode(&plaintext)?;
    Ok(parse_keychain(&root)?)
}

/// Encrypt a keychain holding one entry. Inverse of `decrypt_keychain`.
pub fn encrypt_keychain(
    codec: &dyn StructCodec,
    public_key: &[u8],
    private_key: &[u8],
    keys: &KeychainKeys,
) -> Result<Vec<u8>, E2eeError> {
    let mut entry = BTreeMap::new();
    if let Some(key_id) = keys.key_id {
        entry.insert(FIELD_KEY_ID, CodecValue::I32(key_id));
    }
    entry.insert(FIELD_PUBLIC_KEY, CodecValue::Binary(keys.public_key.clone()));
    entry.insert(FIELD_PRIVATE_KEY, CodecValue::Binary(keys.private_key.to_vec()));

    let mut root = BTreeMap::new();
    root.insert(FIELD_KEYS, CodecValue::List(vec![CodecValue::Struct(entry)]));

    let plaintext = Zeroizing::new(codec.encode(&CodecValue::Struct(root))?);
    let key = keychain_key(public_key, private_key)?;
    Ok(cbc_encrypt(key.key(), key.iv(), &plaintext)?)
}

fn parse_keychain(root: &CodecValue) -> Result<KeychainKeys, CodecError> {
    let list = match root {
        CodecValue::List(items) => items,
        CodecValue::Struct(_) => match root.field(FIELD_KEYS) {
            Some(CodecValue::List(items)) => items,
            Some(_) => return Err(CodecError::UnexpectedType { field: FIELD_KEYS, expected: "list" }),
            None => return Err(CodecError::MissingField(FIELD_KEYS)),
        },
        _ => return Err(CodecError::Malformed("keychain root is neither list nor struct".to_string())),
    };

    let entry = list
        .first()
        .ok_or_else(|| CodecError::Malformed("keychain holds no keys".to_string()))?;

    let key_id = match entry.field(FIELD_KEY_ID) {
        None => None,
        Some(CodecValue::I32(id)) => Some(*id),
        Some(_) => return Err(CodecError::UnexpectedType { field: FIELD_KEY_ID, expected: "i32" }),
    };

    Ok(KeychainKeys {
        key_id,
        public_key: binary_field(entry, FIELD_PUBLIC_KEY)?.to_vec(),
        private_key: Zeroizing::new(binary_field(entry, FIELD_PRIVATE_KEY)?.to_vec()),
    })
}

fn binary_field(entry: &CodecValue, field: i16) -> Result<&[u8], CodecError> {
    match entry.field(field) {
        Some(CodecValue::Binary(bytes)) => Ok(bytes),
        Some(_) => Err(CodecError::UnexpectedType { field, expected: "binary" }),
        None => Err(CodecError::MissingField(field)),
    }
}

/// Proof of keychain possession: AES-ECB of fold(SHA256(data)) under SHA256(DH || "Key").
pub fn encrypt_device_secret(
    public_key: &[u8],
    private_key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, E2eeError> {
    let shared = shared_secret(private_key, public_key)?;
    let key = Zeroizing::new(derive_key(&[shared.as_slice()], KeyLabel::Key));
    let block = fold_digest(&sha256_concat(&[data]));
    Ok(ecb_encrypt(key.as_slice(), &block)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::JsonStructCodec;
    use tlk_crypto::agreement::KeyPair;

    fn sample_keys(key_id: Option<i32>) -> KeychainKeys {
        let pair = KeyPair::generate();
        KeychainKeys {
            key_id,
            public_key: pair.public_key.to_vec(),
            private_key: Zeroizing::new(pair.private_key.to_vec()),
        }
    }

    #[test]
    fn test_keychain_round_trip() {
        let server = KeyPair::generate();
        let device = KeyPair::generate();
        let keys = sample_keys(Some(42));

        let blob =
            encrypt_keychain(&JsonStructCodec, &device.public_key, server.private_key.as_slice(), &keys)
                .unwrap();
        let decoded =
            decrypt_keychain(&JsonStructCodec, &server.public_key, device.private_key.as_slice(), &blob)
                .unwrap();

        assert_eq!(decoded.key_id, Some(42));
        assert_eq!(decoded.public_key, keys.public_key);
        assert_eq!(decoded.private_key.as_slice(), keys.private_key.as_slice());
    }

    #[test]
    fn test_keychain_root_may_be_list() {
        let mut entry = BTreeMap::new();
        entry.insert(FIELD_PUBLIC_KEY, CodecValue::Binary(vec![1; 32]));
        entry.insert(FIELD_PRIVATE_KEY, CodecValue::Binary(vec![2; 32]));
        let root = CodecValue::List(vec![CodecValue::Struct(entry)]);

        let keys = parse_keychain(&root).unwrap();
        assert_eq!(keys.key_id, None);
        assert_eq!(keys.public_key, vec![1; 32]);
    }

    #[test]
    fn test_keychain_missing_private_key() {
        let mut entry = BTreeMap::new();
        entry.insert(FIELD_PUBLIC_KEY, CodecValue::Binary(vec![1; 32]));
        let root = CodecValue::List(vec![CodecValue::Struct(entry)]);

        assert_eq!(parse_keychain(&root).unwrap_err(), CodecError::MissingField(FIELD_PRIVATE_KEY));
        assert!(parse_keychain(&CodecValue::List(vec![])).is_err());
        assert!(parse_keychain(&CodecValue::I32(1)).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let server = KeyPair::generate();
        let device = KeyPair::generate();
        let other = KeyPair::generate();
        let blob = encrypt_keychain(
            &JsonStructCodec,
            &device.public_key,
            server.private_key.as_slice(),
            &sample_keys(None),
        )
        .unwrap();

        // Either the padding check or the codec rejects it
        assert!(decrypt_keychain(&JsonStructCodec, &other.public_key, device.private_key.as_slice(), &blob)
            .is_err());
    }

    #[test]
    fn test_device_secret_is_one_block_and_symmetric() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let proof = encrypt_device_secret(&b.public_key, a.private_key.as_slice(), b"keychain").unwrap();
        let mirrored = encrypt_device_secret(&a.public_key, b.private_key.as_slice(), b"keychain").unwrap();
        assert_eq!(proof.len(), 16);
        assert_eq!(proof, mirrored);

        let other = encrypt_device_secret(&b.public_key, a.private_key.as_slice(), b"other").unwrap();
        assert_ne!(proof, other);
    }
}
