//! The on-chain block: the unit of append, signature, and linkage.
//!
//! `Block::canonical_bytes()` is the single source of truth for what gets
//! hashed and signed. Every field except `hash` and `signature` themselves
//! feeds into it, in a fixed order, via [`BlockBody`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BlockHash, BlockNumber, DilithiumSignature, KeyFingerprint, Timestamp};

/// Coarse subject-matter bucket assigned during auto-keyword extraction.
/// Used by `keywords_by_category` indexing and category-filtered search/streaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Medical,
    Finance,
    Technical,
    Legal,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Medical => "MEDICAL",
            Category::Finance => "FINANCE",
            Category::Technical => "TECHNICAL",
            Category::Legal => "LEGAL",
            Category::Other => "OTHER",
        }
    }
}

/// A handle to the encrypted sidecar file holding a block's oversized payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffChainRef {
    /// Identifier of the `OffChainRecord` in the store.
    pub id: String,
    /// SHA3-256 of the ciphertext, duplicated here so validation can compare
    /// the on-chain commitment against the record without a second lookup.
    pub ciphertext_hash: BlockHash,
}

/// A single persisted block.
///
/// Immutable after persist: the repository enforces that only status and
/// metadata indices may be added alongside a block, never a change to any
/// field here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub data: String,
    pub previous_hash: BlockHash,
    pub hash: BlockHash,
    pub signature: DilithiumSignature,
    pub signer_public_key: KeyFingerprint,
    pub off_chain_ref: Option<OffChainRef>,
    pub is_encrypted: bool,
    pub auto_keywords: Vec<String>,
    pub category: Category,
    pub custom_metadata: BTreeMap<String, serde_json::Value>,
}

/// The fields that are hashed and signed. Excludes `hash` and `signature`
/// themselves — signing would otherwise be circular.
///
/// Field order here is the canonical order; changing it changes every hash
/// in every chain ever produced, so it must never change after release.
#[derive(Serialize)]
pub struct BlockBody<'a> {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub data: &'a str,
    pub previous_hash: &'a BlockHash,
    pub signer_public_key: &'a KeyFingerprint,
    pub off_chain_ref: &'a Option<OffChainRef>,
    pub is_encrypted: bool,
    pub auto_keywords: &'a [String],
    pub category: Category,
    pub custom_metadata: &'a BTreeMap<String, serde_json::Value>,
}

impl Block {
    pub fn body(&self) -> BlockBody<'_> {
        BlockBody {
            number: self.number,
            timestamp: self.timestamp,
            data: &self.data,
            previous_hash: &self.previous_hash,
            signer_public_key: &self.signer_public_key,
            off_chain_ref: &self.off_chain_ref,
            is_encrypted: self.is_encrypted,
            auto_keywords: &self.auto_keywords,
            category: self.category,
            custom_metadata: &self.custom_metadata,
        }
    }

    /// Canonical byte image used for both hashing and signing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(&self.body()).expect("block body serialization is infallible")
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        Block {
            number: 1,
            timestamp: 1_000,
            data: "hello".into(),
            previous_hash: BlockHash::ZERO,
            hash: BlockHash::ZERO,
            signature: DilithiumSignature(vec![]),
            signer_public_key: KeyFingerprint([1u8; 32]),
            off_chain_ref: None,
            is_encrypted: false,
            auto_keywords: vec!["hello".into()],
            category: Category::Other,
            custom_metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn canonical_bytes_stable_under_metadata_key_order() {
        let mut a = sample_block();
        a.custom_metadata.insert("b".into(), serde_json::json!(1));
        a.custom_metadata.insert("a".into(), serde_json::json!(2));

        let mut b = sample_block();
        b.custom_metadata.insert("a".into(), serde_json::json!(2));
        b.custom_metadata.insert("b".into(), serde_json::json!(1));

        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn canonical_bytes_change_with_data() {
        let a = sample_block();
        let mut b = sample_block();
        b.data = "different".into();
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }
}
