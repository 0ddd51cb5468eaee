//! X25519 key agreement.

use rand_core::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Generated X25519 key pair as raw bytes.
pub struct KeyPair {
    pub private_key: Zeroizing<[u8; 32]>,
    pub public_key: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public_key = X25519PublicKey::from(&secret).to_bytes();
        Self {
            private_key: Zeroizing::new(secret.to_bytes()),
            public_key,
        }
    }

    /// Rebuild the pair from an existing private key.
    pub fn from_private(private_key: &[u8]) -> Result<Self, CryptoError> {
        let secret = static_secret(private_key)?;
        let public_key = X25519PublicKey::from(&secret).to_bytes();
        Ok(Self {
            private_key: Zeroizing::new(secret.to_bytes()),
            public_key,
        })
    }
}

fn static_secret(private_key: &[u8]) -> Result<StaticSecret, CryptoError> {
    let arr: [u8; 32] = private_key
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength { expected: "32", got: private_key.len() })?;
    Ok(StaticSecret::from(arr))
}

/// X25519 Diffie-Hellman between a private scalar and a peer public key.
pub fn shared_secret(private_key: &[u8], public_key: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let secret = static_secret(private_key)?;
    let public: [u8; 32] = public_key
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength { expected: "32", got: public_key.len() })?;
    let shared = secret.diffie_hellman(&X25519PublicKey::from(public));
    Ok(Zeroizing::new(shared.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_known_answer() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let a_pub = KeyPair::from_private(&a).unwrap().public_key;
        let b_pub = KeyPair::from_private(&b).unwrap().public_key;
        assert_eq!(
            hex::encode(a_pub),
            "a4e09292b651c278b9772c569f5fa9bb13d906b46ab68c9df9dc2b4409f8a209"
        );
        assert_eq!(
            hex::encode(b_pub),
            "ce8d3ad1ccb633ec7b70c17814a5c76ecd029685050d344745ba05870e587d59"
        );

        let ab = shared_secret(&a, &b_pub).unwrap();
        let ba = shared_secret(&b, &a_pub).unwrap();
        assert_eq!(*ab, *ba);
        assert_eq!(
            hex::encode(*ab),
            "2ed76ab549b1e73c031eb49c9448f0798aea81b698279a0c3dc3e49fbfc4b953"
        );
    }

    #[test]
    fn test_generated_pairs_agree() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let s1 = shared_secret(&*alice.private_key, &bob.public_key).unwrap();
        let s2 = shared_secret(&*bob.private_key, &alice.public_key).unwrap();
        assert_eq!(*s1, *s2);
    }

    #[test]
    fn test_rejects_short_keys() {
        let err = shared_secret(&[0u8; 31], &[0u8; 32]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { got: 31, .. }));
        let err = shared_secret(&[0u8; 32], &[0u8; 33]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { got: 33, .. }));
    }
}
