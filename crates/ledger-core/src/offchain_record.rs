//! Data shape for a persisted off-chain sidecar record. The write/verify
//! algorithm lives in `ledger-offchain`; this crate only owns the shape that
//! gets stored and exported.

use serde::{Deserialize, Serialize};

use crate::types::{BlockHash, DilithiumSignature, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OffChainRecord {
    pub id: String,
    /// Path to the ciphertext file, relative to the configured off-chain root.
    pub file_path: String,
    pub plaintext_size: u64,
    pub ciphertext_hash: BlockHash,
    /// Signature over `ciphertext_hash` by the block's signer.
    pub signature: DilithiumSignature,
    pub created_at: Timestamp,
    pub encryption_nonce: [u8; 12],
}
