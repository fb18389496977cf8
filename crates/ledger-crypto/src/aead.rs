use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use thiserror::Error;

use ledger_core::{AEAD_NONCE_LEN, AEAD_TAG_LEN};

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed: authentication tag mismatch or corrupted ciphertext")]
    DecryptionFailed,
    #[error("key must be exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Derive a symmetric block key. The off-chain store uses one fresh random
/// key per block rather than a single chain-wide key, so compromise of one
/// sidecar never exposes another; this function exists to keep that key
/// generation in one place rather than scattered `rand` calls.
pub fn generate_block_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; AEAD_NONCE_LEN] {
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Deterministically derive a block's symmetric key from a master secret.
/// Distinct from `generate_block_key`, which is used when no master secret
/// is in play and a fresh random key is written straight into the
/// `OffChainRecord`; this one lets a holder of `master_secret` recompute a
/// block's key without having stored it anywhere.
pub fn derive_block_key(master_secret: &[u8], block_number: u64, off_chain_ref: &str) -> [u8; 32] {
    let mut input = Vec::with_capacity(master_secret.len() + 8 + off_chain_ref.len());
    input.extend_from_slice(master_secret);
    input.extend_from_slice(&block_number.to_be_bytes());
    input.extend_from_slice(off_chain_ref.as_bytes());
    crate::hash::sha3_256(&input)
}

/// Encrypt `plaintext` with ChaCha20-Poly1305, binding `aad` into the
/// authentication tag without including it in the ciphertext. Returns
/// ciphertext with the 16-byte tag appended, matching the on-disk sidecar
/// format.
pub fn encrypt(key: &[u8; 32], nonce: &[u8; AEAD_NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| AeadError::EncryptionFailed)
}

/// Decrypt a ciphertext produced by [`encrypt`] with the same `aad`. Fails
/// closed: any authentication failure (including `aad` mismatch) is
/// reported as [`AeadError::DecryptionFailed`] without distinguishing
/// tampering from corruption, so callers cannot leak which failure mode
/// occurred.
pub fn decrypt(key: &[u8; 32], nonce: &[u8; AEAD_NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
    if ciphertext.len() < AEAD_TAG_LEN {
        return Err(AeadError::DecryptionFailed);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| AeadError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_block_key();
        let nonce = generate_nonce();
        let ct = encrypt(&key, &nonce, b"sensitive payload", b"block-7").unwrap();
        let pt = decrypt(&key, &nonce, &ct, b"block-7").unwrap();
        assert_eq!(pt, b"sensitive payload");
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key = generate_block_key();
        let nonce = generate_nonce();
        let mut ct = encrypt(&key, &nonce, b"sensitive payload", b"block-7").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(decrypt(&key, &nonce, &ct, b"block-7").is_err());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let key = generate_block_key();
        let other = generate_block_key();
        let nonce = generate_nonce();
        let ct = encrypt(&key, &nonce, b"sensitive payload", b"block-7").unwrap();
        assert!(decrypt(&other, &nonce, &ct, b"block-7").is_err());
    }

    #[test]
    fn mismatched_aad_fails_closed() {
        let key = generate_block_key();
        let nonce = generate_nonce();
        let ct = encrypt(&key, &nonce, b"sensitive payload", b"block-7").unwrap();
        assert!(decrypt(&key, &nonce, &ct, b"block-8").is_err());
    }
}
