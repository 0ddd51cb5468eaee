//! AES modes used by the protocol.
//!
//! - AES-256-GCM with a 16-byte nonce and a 16-byte tag appended to the
//!   ciphertext (spec v2 messages).
//! - AES-CBC with PKCS#7 padding (spec v1 messages, group key envelopes,
//!   keychain blobs). The AES variant follows the key length.
//! - AES-ECB without padding (device secret proof).

use aes::cipher::consts::U16;
use aes::cipher::{BlockEncrypt, BlockSizeUser};
use aes::{Aes128, Aes256};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{AesGcm, Nonce};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CryptoError;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Salt, nonce and tag length of spec v2 messages.
pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

fn gcm(key: &[u8]) -> Result<Aes256Gcm16, CryptoError> {
    Aes256Gcm16::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: "32", got: key.len() })
}

fn check_nonce(nonce: &[u8]) -> Result<(), CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidIvLength { expected: NONCE_LEN, got: nonce.len() });
    }
    Ok(())
}

/// Encrypt with AES-256-GCM. Returns ciphertext || tag.
pub fn gcm_seal(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_nonce(nonce)?;
    gcm(key)?
        .encrypt(Nonce::<U16>::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Verify and decrypt ciphertext || tag with AES-256-GCM.
pub fn gcm_open(key: &[u8], nonce: &[u8], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_nonce(nonce)?;
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    gcm(key)?
        .decrypt(Nonce::<U16>::from_slice(nonce), Payload { msg: sealed, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// PKCS#7-pad and encrypt with AES-CBC (AES-128 or AES-256 by key length).
pub fn cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_iv(iv)?;
    match key.len() {
        16 => Ok(cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| bad_cbc_key(key))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        32 => Ok(cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| bad_cbc_key(key))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        _ => Err(bad_cbc_key(key)),
    }
}

/// Decrypt with AES-CBC and strip PKCS#7 padding (block size 16).
pub fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_iv(iv)?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidBlockLength { got: ciphertext.len() });
    }
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| bad_cbc_key(key))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| bad_cbc_key(key))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding),
        _ => Err(bad_cbc_key(key)),
    }
}

/// Encrypt whole blocks with AES-ECB, no padding.
pub fn ecb_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidBlockLength { got: data.len() });
    }
    match key.len() {
        16 => Ok(ecb_blocks(&Aes128::new_from_slice(key).map_err(|_| bad_cbc_key(key))?, data)),
        32 => Ok(ecb_blocks(&Aes256::new_from_slice(key).map_err(|_| bad_cbc_key(key))?, data)),
        _ => Err(bad_cbc_key(key)),
    }
}

fn ecb_blocks<C>(cipher: &C, data: &[u8]) -> Vec<u8>
where
    C: BlockEncrypt + BlockSizeUser<BlockSize = U16>,
{
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut block = aes::Block::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

fn check_iv(iv: &[u8]) -> Result<(), CryptoError> {
    if iv.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidIvLength { expected: BLOCK_SIZE, got: iv.len() });
    }
    Ok(())
}

fn bad_cbc_key(key: &[u8]) -> CryptoError {
    CryptoError::InvalidKeyLength { expected: "16 or 32", got: key.len() }
}

/// Fill an array from the OS RNG.
pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out).map_err(|_| CryptoError::RngError)?;
    Ok(out)
}
