//! Data shape for per-block search metadata. Extraction and coordination
//! live in `ledger-index`; this crate only owns the persisted shape.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::block::Category;
use crate::types::{BlockNumber, KeyFingerprint};

/// Coarse payload-size bucket, used to narrow search without decrypting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeBucket {
    Tiny,   // < 1 KiB
    Small,  // < 64 KiB
    Medium, // < threshold
    Large,  // off-chain
}

impl SizeBucket {
    pub fn for_len(bytes: usize, off_chain_threshold: usize) -> Self {
        if bytes >= off_chain_threshold {
            SizeBucket::Large
        } else if bytes >= 64 * 1024 {
            SizeBucket::Medium
        } else if bytes >= 1024 {
            SizeBucket::Small
        } else {
            SizeBucket::Tiny
        }
    }
}

/// At most one entry per block; writes are serialized by the coordinator's
/// per-block lock, never by this struct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub block_number: BlockNumber,
    pub public_tokens: BTreeSet<String>,
    pub private_tokens: BTreeSet<String>,
    pub keywords_by_category: BTreeMap<Category, BTreeSet<String>>,
    pub size_bucket: SizeBucket,
    pub signer_fingerprint: KeyFingerprint,
}
