use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Mutex;

use ledger_core::{
    AuthorizedKey, Block, BlockNumber, Category, HierarchicalKey, IndexEntry, KeyFingerprint,
    LedgerError, OffChainRecord,
};

/// Persistent state database backed by sled (pure-Rust, no C dependencies,
/// single-writer semantics enforced by the OS file lock sled takes on open).
///
/// Named trees:
///   blocks             — block_number (u64 BE) → bincode(Block)
///   meta               — utf8 key bytes        → raw bytes
///   keys               — fingerprint ++ created_at (BE) → bincode(AuthorizedKey)
///   hierarchical_keys  — id utf8 bytes          → bincode(HierarchicalKey)
///   index_entries      — block_number (u64 BE)  → bincode(IndexEntry)
///   offchain_records   — id utf8 bytes          → bincode(OffChainRecord)
///
/// `write_lock` is the pessimistic lock `ChainEngine` holds across sequence
/// allocation + persist, so two concurrent `append` calls can never be
/// assigned the same block number.
pub struct LedgerDb {
    db: sled::Db,
    blocks: sled::Tree,
    meta: sled::Tree,
    keys: sled::Tree,
    hierarchical_keys: sled::Tree,
    index_entries: sled::Tree,
    offchain_records: sled::Tree,
    write_lock: Mutex<()>,
}

fn storage_err(e: sled::Error) -> LedgerError {
    LedgerError::StorageError(e.to_string())
}

fn ser_err(e: bincode::Error) -> LedgerError {
    LedgerError::StorageError(format!("serialization error: {e}"))
}

impl LedgerDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = sled::open(path).map_err(storage_err)?;
        let blocks = db.open_tree("blocks").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        let keys = db.open_tree("keys").map_err(storage_err)?;
        let hierarchical_keys = db.open_tree("hierarchical_keys").map_err(storage_err)?;
        let index_entries = db.open_tree("index_entries").map_err(storage_err)?;
        let offchain_records = db.open_tree("offchain_records").map_err(storage_err)?;
        Ok(Self {
            db,
            blocks,
            meta,
            keys,
            hierarchical_keys,
            index_entries,
            offchain_records,
            write_lock: Mutex::new(()),
        })
    }

    /// Hold this across sequence allocation and persist to serialize writers.
    pub fn lock_for_write(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().expect("write lock poisoned")
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Blocks ───────────────────────────────────────────────────────────

    fn block_key(number: BlockNumber) -> [u8; 8] {
        number.to_be_bytes()
    }

    pub fn find_block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, LedgerError> {
        match self.blocks.get(Self::block_key(number)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn last_block(&self) -> Result<Option<Block>, LedgerError> {
        match self.blocks.last().map_err(storage_err)? {
            Some((_, bytes)) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Block number the next append should use: one past the current tip, or
    /// `0` for an empty chain. Callers must hold `lock_for_write` while
    /// allocating and persisting, or two appends can race onto the same number.
    pub fn next_block_number(&self) -> Result<BlockNumber, LedgerError> {
        Ok(self.last_block()?.map(|b| b.number + 1).unwrap_or(0))
    }

    pub fn persist_block(&self, block: &Block) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(block).map_err(ser_err)?;
        self.blocks
            .insert(Self::block_key(block.number), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Persist a contiguous run of blocks as a single sled batch, so a crash
    /// mid-write cannot leave a partially-applied batch visible.
    pub fn persist_blocks(&self, blocks: &[Block]) -> Result<(), LedgerError> {
        let mut batch = sled::Batch::default();
        for block in blocks {
            let bytes = bincode::serialize(block).map_err(ser_err)?;
            batch.insert(&Self::block_key(block.number), bytes);
        }
        self.blocks.apply_batch(batch).map_err(storage_err)?;
        Ok(())
    }

    /// Remove every block strictly after `number`, returning the count removed.
    /// Used by rollback; the caller is responsible for also clearing
    /// dependent index entries and off-chain sidecars.
    pub fn delete_blocks_after(&self, number: BlockNumber) -> Result<u64, LedgerError> {
        let mut removed = 0u64;
        let keys_to_remove: Vec<Vec<u8>> = self
            .blocks
            .range(Self::block_key(number + 1)..)
            .map(|item| item.map(|(k, _)| k.to_vec()).map_err(storage_err))
            .collect::<Result<_, _>>()?;
        for key in keys_to_remove {
            self.blocks.remove(&key).map_err(storage_err)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn delete_block_by_number(&self, number: BlockNumber) -> Result<(), LedgerError> {
        self.blocks.remove(Self::block_key(number)).map_err(storage_err)?;
        Ok(())
    }

    pub fn count_blocks(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Stream every block in number order. `f` returns `ControlFlow::Break`
    /// to stop early; the whole chain is never materialized into memory.
    pub fn stream_all_blocks(
        &self,
        mut f: impl FnMut(Block) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        for item in self.blocks.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let block: Block = bincode::deserialize(&bytes).map_err(ser_err)?;
            if f(block).is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn stream_blocks_after(
        &self,
        number: BlockNumber,
        mut f: impl FnMut(Block) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        for item in self.blocks.range(Self::block_key(number + 1)..) {
            let (_, bytes) = item.map_err(storage_err)?;
            let block: Block = bincode::deserialize(&bytes).map_err(ser_err)?;
            if f(block).is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn stream_blocks_by_time_range(
        &self,
        start: ledger_core::Timestamp,
        end: ledger_core::Timestamp,
        mut f: impl FnMut(Block) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        self.stream_all_blocks(|block| {
            if block.timestamp >= start && block.timestamp <= end {
                f(block)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    pub fn stream_encrypted_blocks(
        &self,
        mut f: impl FnMut(Block) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        self.stream_all_blocks(|block| {
            if block.is_encrypted {
                f(block)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    pub fn stream_blocks_with_off_chain(
        &self,
        mut f: impl FnMut(Block) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        self.stream_all_blocks(|block| {
            if block.off_chain_ref.is_some() {
                f(block)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    pub fn stream_blocks_by_signer(
        &self,
        signer: KeyFingerprint,
        mut f: impl FnMut(Block) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        self.stream_all_blocks(|block| {
            if block.signer_public_key == signer {
                f(block)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    pub fn stream_blocks_by_category(
        &self,
        category: Category,
        mut f: impl FnMut(Block) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        self.stream_all_blocks(|block| {
            if block.category == category {
                f(block)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    // ── Meta ─────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }

    // ── Authorized keys ──────────────────────────────────────────────────

    fn key_record_key(fingerprint: KeyFingerprint, created_at: ledger_core::Timestamp) -> Vec<u8> {
        let mut k = fingerprint.as_bytes().to_vec();
        k.extend_from_slice(&created_at.to_be_bytes());
        k
    }

    pub fn put_key_record(&self, record: &AuthorizedKey) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(record).map_err(ser_err)?;
        self.keys
            .insert(Self::key_record_key(record.fingerprint, record.created_at), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// All historical records for a fingerprint, oldest first. `KeyStore`
    /// picks the most recent record with `created_at <= t` to answer
    /// "was this key authorized at time t".
    pub fn iter_key_records_for(&self, fingerprint: KeyFingerprint) -> Result<Vec<AuthorizedKey>, LedgerError> {
        let mut out = Vec::new();
        for item in self.keys.scan_prefix(fingerprint.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn iter_all_key_records(&self) -> Result<Vec<AuthorizedKey>, LedgerError> {
        let mut out = Vec::new();
        for item in self.keys.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn delete_key_records_for(&self, fingerprint: KeyFingerprint) -> Result<(), LedgerError> {
        let keys_to_remove: Vec<Vec<u8>> = self
            .keys
            .scan_prefix(fingerprint.as_bytes())
            .map(|item| item.map(|(k, _)| k.to_vec()).map_err(storage_err))
            .collect::<Result<_, _>>()?;
        for key in keys_to_remove {
            self.keys.remove(&key).map_err(storage_err)?;
        }
        Ok(())
    }

    // ── Hierarchical keys ────────────────────────────────────────────────

    pub fn put_hierarchical_key(&self, hk: &HierarchicalKey) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(hk).map_err(ser_err)?;
        self.hierarchical_keys.insert(hk.id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_hierarchical_key(&self, id: &str) -> Result<Option<HierarchicalKey>, LedgerError> {
        match self.hierarchical_keys.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn iter_hierarchical_keys_by_parent(&self, parent_id: &str) -> Result<Vec<HierarchicalKey>, LedgerError> {
        let mut out = Vec::new();
        for item in self.hierarchical_keys.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let hk: HierarchicalKey = bincode::deserialize(&bytes).map_err(ser_err)?;
            if hk.parent_id.as_deref() == Some(parent_id) {
                out.push(hk);
            }
        }
        Ok(out)
    }

    pub fn iter_all_hierarchical_keys(&self) -> Result<Vec<HierarchicalKey>, LedgerError> {
        let mut out = Vec::new();
        for item in self.hierarchical_keys.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Index entries ────────────────────────────────────────────────────

    pub fn put_index_entry(&self, entry: &IndexEntry) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(entry).map_err(ser_err)?;
        self.index_entries
            .insert(Self::block_key(entry.block_number), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_index_entry(&self, number: BlockNumber) -> Result<Option<IndexEntry>, LedgerError> {
        match self.index_entries.get(Self::block_key(number)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn has_index_entry(&self, number: BlockNumber) -> bool {
        self.index_entries.contains_key(Self::block_key(number)).unwrap_or(false)
    }

    pub fn stream_index_entries(
        &self,
        mut f: impl FnMut(IndexEntry) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        for item in self.index_entries.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let entry: IndexEntry = bincode::deserialize(&bytes).map_err(ser_err)?;
            if f(entry).is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn delete_index_entries_after(&self, number: BlockNumber) -> Result<(), LedgerError> {
        let keys_to_remove: Vec<Vec<u8>> = self
            .index_entries
            .range(Self::block_key(number + 1)..)
            .map(|item| item.map(|(k, _)| k.to_vec()).map_err(storage_err))
            .collect::<Result<_, _>>()?;
        for key in keys_to_remove {
            self.index_entries.remove(&key).map_err(storage_err)?;
        }
        Ok(())
    }

    // ── Off-chain records ────────────────────────────────────────────────

    pub fn put_offchain_record(&self, record: &OffChainRecord) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(record).map_err(ser_err)?;
        self.offchain_records.insert(record.id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_offchain_record(&self, id: &str) -> Result<Option<OffChainRecord>, LedgerError> {
        match self.offchain_records.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn delete_offchain_record(&self, id: &str) -> Result<(), LedgerError> {
        self.offchain_records.remove(id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_all_offchain_records(&self) -> Result<Vec<OffChainRecord>, LedgerError> {
        let mut out = Vec::new();
        for item in self.offchain_records.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{BlockHash, Category, DilithiumSignature};
    use std::collections::BTreeMap;

    fn sample_block(number: BlockNumber) -> Block {
        Block {
            number,
            timestamp: 1_000 + number as i64,
            data: format!("block {number}"),
            previous_hash: BlockHash::ZERO,
            hash: BlockHash::ZERO,
            signature: DilithiumSignature(vec![]),
            signer_public_key: KeyFingerprint([1u8; 32]),
            off_chain_ref: None,
            is_encrypted: false,
            auto_keywords: vec![],
            category: Category::Other,
            custom_metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn persist_and_fetch_round_trip() {
        let dir = tempdir();
        let db = LedgerDb::open(dir.path()).unwrap();
        db.persist_block(&sample_block(0)).unwrap();
        db.persist_block(&sample_block(1)).unwrap();
        assert_eq!(db.last_block().unwrap().unwrap().number, 1);
        assert_eq!(db.next_block_number().unwrap(), 2);
        assert!(db.find_block_by_number(0).unwrap().is_some());
    }

    #[test]
    fn delete_blocks_after_truncates_tail() {
        let dir = tempdir();
        let db = LedgerDb::open(dir.path()).unwrap();
        for n in 0..5 {
            db.persist_block(&sample_block(n)).unwrap();
        }
        let removed = db.delete_blocks_after(2).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.next_block_number().unwrap(), 3);
    }

    #[test]
    fn stream_blocks_by_time_range_filters() {
        let dir = tempdir();
        let db = LedgerDb::open(dir.path()).unwrap();
        for n in 0..5 {
            db.persist_block(&sample_block(n)).unwrap();
        }
        let mut seen = Vec::new();
        db.stream_blocks_by_time_range(1001, 1003, |b| {
            seen.push(b.number);
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
