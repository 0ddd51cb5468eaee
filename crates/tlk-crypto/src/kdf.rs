//! Label-suffixed SHA-256 key derivation and XOR folding.
//!
//! The protocol has a single KDF: SHA-256 over the concatenated inputs,
//! followed by an ASCII label. Keys use the `Key` label; IVs use the `IV`
//! label and are then folded from 32 to 16 bytes by XOR-ing the two halves.

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain-separation label appended to the KDF input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLabel {
    Key,
    Iv,
}

impl KeyLabel {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            KeyLabel::Key => b"Key",
            KeyLabel::Iv => b"IV",
        }
    }
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Sha256::new();
    for part in parts {
        h.update(part);
    }
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// SHA256(parts[0] || parts[1] || ... || label).
pub fn derive_key(parts: &[&[u8]], label: KeyLabel) -> [u8; 32] {
    let mut h = Sha256::new();
    for part in parts {
        h.update(part);
    }
    h.update(label.as_bytes());
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// XOR the first half of `input` with the second half.
///
/// The output has `input.len() / 2` bytes; a trailing odd byte is ignored.
pub fn fold_half(input: &[u8]) -> Vec<u8> {
    let half = input.len() / 2;
    (0..half).map(|i| input[i] ^ input[half + i]).collect()
}

/// Fixed-size fold of a SHA-256 digest into a 16-byte IV.
pub fn fold_digest(digest: &[u8; 32]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, b) in out.iter_mut().enumerate() {
        *b = digest[i] ^ digest[16 + i];
    }
    out
}

/// AES key and IV derived from a shared secret and an optional salt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; 32],
    iv: [u8; 16],
}

impl SymmetricKey {
    /// key = SHA256(shared || salt || "Key"), iv = fold(SHA256(shared || salt || "IV")).
    ///
    /// An empty salt gives the unsalted derivation used by keychain and
    /// group-key unwrapping.
    pub fn derive(shared_secret: &[u8], salt: &[u8]) -> Self {
        let key = derive_key(&[shared_secret, salt], KeyLabel::Key);
        let iv = fold_digest(&derive_key(&[shared_secret, salt], KeyLabel::Iv));
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }
}
