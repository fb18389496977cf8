use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::ControlFlow;
use std::sync::Arc;

use ledger_core::{BlockNumber, LedgerError};
use ledger_keystore::KeyStore;
use ledger_offchain::OffChainStore;
use ledger_store::LedgerDb;

use crate::query::{validate_max_results, validate_query_term, SearchLevel};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub block_number: BlockNumber,
    pub matched_in: MatchSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchSource {
    Index,
    OnChainData,
    OffChainPayload,
}

/// Collect the `max_results` smallest block numbers from an unordered
/// stream of candidates using a bounded max-heap: push every candidate,
/// and once the heap exceeds capacity pop the current largest so it never
/// grows past `max_results`. What remains at the end is exactly the
/// smallest-numbered `max_results` matches, which the caller then sorts
/// ascending for the final stable ordering the spec requires.
struct BoundedTopN {
    heap: BinaryHeap<(BlockNumber, MatchSource)>,
    capacity: usize,
}

impl BoundedTopN {
    fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
        }
    }

    fn push(&mut self, number: BlockNumber, source: MatchSource) {
        self.heap.push((number, source));
        if self.heap.len() > self.capacity {
            self.heap.pop();
        }
    }

    fn into_sorted_hits(self) -> Vec<SearchHit> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|(block_number, matched_in)| SearchHit { block_number, matched_in })
            .collect()
    }
}

pub struct SearchEngine {
    db: Arc<LedgerDb>,
    offchain: Arc<OffChainStore>,
    keystore: Arc<KeyStore>,
}

impl SearchEngine {
    pub fn new(db: Arc<LedgerDb>, offchain: Arc<OffChainStore>, keystore: Arc<KeyStore>) -> Self {
        Self { db, offchain, keystore }
    }

    /// Run a search at the given level. `max_results` is REQUIRED; `0` is
    /// rejected rather than treated as "unlimited". `decrypt` is consulted
    /// only at `ExhaustiveOffchain` and only for blocks whose signer
    /// fingerprint it recognizes — callers without key material for a given
    /// signer simply never see that signer's encrypted content match.
    pub fn search(
        &self,
        level: SearchLevel,
        query_term: &str,
        max_results: usize,
        search_ceiling: usize,
        decrypt: Option<&dyn Fn(&ledger_core::Block) -> Option<[u8; 32]>>,
    ) -> Result<Vec<SearchHit>, LedgerError> {
        validate_query_term(query_term)?;
        let max_results = validate_max_results(max_results, search_ceiling)?;
        let needle = query_term.to_lowercase();

        let mut top_n = BoundedTopN::new(max_results);
        let mut exact_count = 0usize;

        self.db.stream_index_entries(|entry| {
            if entry.public_tokens.contains(&needle) || entry.private_tokens.contains(&needle) {
                top_n.push(entry.block_number, MatchSource::Index);
                exact_count += 1;
                if exact_count >= max_results {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;

        if level == SearchLevel::FastOnly {
            return Ok(top_n.into_sorted_hits());
        }

        // INCLUDE_DATA: stream on-chain data for unencrypted blocks whose
        // content (not just the index) contains the term.
        let mut content_count = exact_count;
        self.db.stream_all_blocks(|block| {
            if content_count >= max_results {
                return ControlFlow::Break(());
            }
            if !block.is_encrypted && block.data.to_lowercase().contains(&needle) {
                top_n.push(block.number, MatchSource::OnChainData);
                content_count += 1;
            }
            ControlFlow::Continue(())
        })?;

        if level == SearchLevel::IncludeData {
            return Ok(top_n.into_sorted_hits());
        }

        // EXHAUSTIVE_OFFCHAIN: decrypt matching encrypted blocks and scan
        // their off-chain payloads, bounded by MAX_JSON_ITERATIONS batches.
        let mut scanned = 0usize;
        self.db.stream_blocks_with_off_chain(|block| {
            if content_count >= max_results {
                return ControlFlow::Break(());
            }
            scanned += 1;
            if let Some(key) = decrypt.and_then(|f| f(&block)) {
                if let Some(off_chain_ref) = &block.off_chain_ref {
                    if let Some(signer_public_key) = self.keystore.public_key_for(block.signer_public_key) {
                        if let Ok(Some(record)) = self.offchain.get_record(&off_chain_ref.id) {
                            if let Ok(plaintext) = self.offchain.verify_and_decrypt(
                                &record,
                                block.number,
                                block.signer_public_key,
                                &signer_public_key,
                                off_chain_ref.ciphertext_hash,
                                &key,
                            ) {
                                if scan_payload_for_term(&plaintext, &needle, ledger_core::DEFAULT_MAX_JSON_RECURSION) {
                                    top_n.push(block.number, MatchSource::OffChainPayload);
                                    content_count += 1;
                                }
                            }
                        }
                    }
                }
            }
            ControlFlow::Continue(())
        })?;

        Ok(top_n.into_sorted_hits())
    }

    /// Wildcard metadata search: `field*` matches any `custom_metadata` key
    /// starting with the prefix before `*`. Bounded the same way as term
    /// search to prevent a hot-key prefix from unbounding the result set.
    pub fn search_metadata_wildcard(&self, prefix_pattern: &str, max_results: usize, search_ceiling: usize) -> Result<Vec<SearchHit>, LedgerError> {
        let max_results = validate_max_results(max_results, search_ceiling)?;
        let prefix = prefix_pattern.strip_suffix('*').unwrap_or(prefix_pattern);
        let mut top_n = BoundedTopN::new(max_results);
        let mut count = 0usize;

        self.db.stream_all_blocks(|block| {
            if count >= max_results {
                return ControlFlow::Break(());
            }
            if block.custom_metadata.keys().any(|k| k.starts_with(prefix)) {
                top_n.push(block.number, MatchSource::Index);
                count += 1;
            }
            ControlFlow::Continue(())
        })?;

        Ok(top_n.into_sorted_hits())
    }
}

/// Bounded text/JSON scan of an off-chain payload for `needle`. Tries a
/// JSON parse first (bounded recursion); falls back to a raw substring scan
/// for non-JSON payloads.
fn scan_payload_for_term(plaintext: &[u8], needle: &str, max_recursion: u32) -> bool {
    match serde_json::from_slice::<serde_json::Value>(plaintext) {
        Ok(value) => json_contains(&value, needle, max_recursion),
        Err(_) => String::from_utf8_lossy(plaintext).to_lowercase().contains(needle),
    }
}

fn json_contains(value: &serde_json::Value, needle: &str, depth_remaining: u32) -> bool {
    if depth_remaining == 0 {
        return false;
    }
    match value {
        serde_json::Value::String(s) => s.to_lowercase().contains(needle),
        serde_json::Value::Array(items) => items.iter().any(|v| json_contains(v, needle, depth_remaining - 1)),
        serde_json::Value::Object(map) => map
            .iter()
            .any(|(k, v)| k.to_lowercase().contains(needle) || json_contains(v, needle, depth_remaining - 1)),
        serde_json::Value::Number(n) => n.to_string().contains(needle),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_top_n_keeps_smallest_numbers() {
        let mut top_n = BoundedTopN::new(2);
        top_n.push(5, MatchSource::Index);
        top_n.push(1, MatchSource::Index);
        top_n.push(3, MatchSource::Index);
        let hits: Vec<_> = top_n.into_sorted_hits().into_iter().map(|h| h.block_number).collect();
        assert_eq!(hits, vec![1, 3]);
    }

    #[test]
    fn json_scan_finds_nested_string() {
        let payload = serde_json::json!({"patient": {"name": "quantumtoken"}});
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert!(scan_payload_for_term(&bytes, "quantumtoken", 100));
        assert!(!scan_payload_for_term(&bytes, "nonexistentword", 100));
    }

    #[test]
    fn json_scan_respects_recursion_bound() {
        let payload = serde_json::json!({"a": {"b": {"c": "deepvalue"}}});
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert!(scan_payload_for_term(&bytes, "deepvalue", 100));
        assert!(!scan_payload_for_term(&bytes, "deepvalue", 1));
    }
}
