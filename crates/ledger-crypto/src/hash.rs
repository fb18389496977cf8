use sha3::{Digest, Sha3_256};

use ledger_core::{BlockHash, KeyFingerprint};

/// SHA3-256 of arbitrary bytes.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Derive a block's hash from its canonical byte image.
pub fn block_hash(canonical_bytes: &[u8]) -> BlockHash {
    BlockHash::from_bytes(sha3_256(canonical_bytes))
}

/// Derive a signer's fingerprint from their raw public key. Blocks and
/// authorization records reference signers by fingerprint only; the raw
/// public key never appears on-chain.
pub fn key_fingerprint(raw_public_key: &[u8]) -> KeyFingerprint {
    KeyFingerprint::from_bytes(sha3_256(raw_public_key))
}

/// Hash of an off-chain ciphertext, used as the on-chain commitment.
pub fn ciphertext_hash(ciphertext: &[u8]) -> BlockHash {
    BlockHash::from_bytes(sha3_256(ciphertext))
}
