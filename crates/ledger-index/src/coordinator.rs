use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ledger_core::{Block, BlockNumber, IndexEntry, LedgerError};
use ledger_store::LedgerDb;

/// Guarantees at most one indexing task executes per `block_number` at any
/// time, with concurrent attempts serialized in FIFO order via a per-block
/// `tokio::sync::Mutex`. Re-checks "already indexed" inside the critical
/// section so two racing submissions for the same block cannot both decide
/// "not indexed" and then both write.
pub struct IndexingCoordinator {
    db: Arc<LedgerDb>,
    locks: Mutex<HashMap<BlockNumber, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Arc<AtomicI64>,
    accepting: Arc<AtomicBool>,
}

impl IndexingCoordinator {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
            in_flight: Arc::new(AtomicI64::new(0)),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    fn lock_for(&self, block_number: BlockNumber) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("indexing lock table poisoned");
        locks
            .entry(block_number)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn in_flight_count(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Index one block if it has not already been indexed. `extract` builds
    /// the `IndexEntry` from the block; it only runs once the per-block lock
    /// is held and the double-check confirms no entry exists yet.
    pub async fn index_block(&self, block: &Block, extract: impl FnOnce(&Block) -> IndexEntry) -> Result<(), LedgerError> {
        let lock = self.lock_for(block.number);
        let _guard = lock.lock().await;

        if self.db.has_index_entry(block.number) {
            return Ok(());
        }

        let entry = extract(block);
        self.db.put_index_entry(&entry)?;
        Ok(())
    }

    /// Submit a block for indexing on `handle`, incrementing the in-flight
    /// counter *before* the task is spawned so `wait_for_indexing_completion`
    /// can never observe a task that was spawned but not yet counted.
    pub fn submit(
        &self,
        handle: &tokio::runtime::Handle,
        coordinator: Arc<IndexingCoordinator>,
        block: Block,
        extract: impl FnOnce(&Block) -> IndexEntry + Send + 'static,
    ) -> Result<(), LedgerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(LedgerError::IndexingFailed(
                block.number,
                "coordinator is shutting down".into(),
            ));
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.clone();
        handle.spawn(async move {
            let result = coordinator.index_block(&block, extract).await;
            if let Err(e) = result {
                tracing::warn!(block_number = block.number, error = %e, "indexing failed");
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    /// Refuse new submissions and wait (with timeout) for in-flight work to
    /// drain. Returns `true` if the counter reached zero before `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.wait_for_indexing_completion(timeout)
    }

    pub fn wait_for_indexing_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{BlockHash, Category, DilithiumSignature, KeyFingerprint};
    use std::collections::{BTreeMap, BTreeSet};

    fn sample_block(number: BlockNumber) -> Block {
        Block {
            number,
            timestamp: 1_000,
            data: "hello world".into(),
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

    fn trivial_entry(block: &Block) -> IndexEntry {
        IndexEntry {
            block_number: block.number,
            public_tokens: BTreeSet::new(),
            private_tokens: BTreeSet::new(),
            keywords_by_category: BTreeMap::new(),
            size_bucket: ledger_core::SizeBucket::Tiny,
            signer_fingerprint: block.signer_public_key,
        }
    }

    #[tokio::test]
    async fn second_index_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDb::open(dir.path()).unwrap());
        let coordinator = IndexingCoordinator::new(db.clone());
        let block = sample_block(0);

        coordinator.index_block(&block, trivial_entry).await.unwrap();
        assert!(db.has_index_entry(0));

        let call_count = std::sync::atomic::AtomicU32::new(0);
        coordinator
            .index_block(&block, |b| {
                call_count.fetch_add(1, Ordering::SeqCst);
                trivial_entry(b)
            })
            .await
            .unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_increments_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDb::open(dir.path()).unwrap());
        let coordinator = Arc::new(IndexingCoordinator::new(db));
        let handle = tokio::runtime::Handle::current();
        coordinator
            .submit(&handle, coordinator.clone(), sample_block(0), trivial_entry)
            .unwrap();
        assert!(coordinator.wait_for_indexing_completion(Duration::from_secs(1)));
        assert_eq!(coordinator.in_flight_count(), 0);
    }
}
