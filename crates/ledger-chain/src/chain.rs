use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use ledger_core::{
    Block, BlockHash, BlockNumber, Category, DilithiumPublicKey, DilithiumSignature, KeyFingerprint,
    LedgerError, OffChainRef, Role, Timestamp,
};
use ledger_crypto::{block_hash, generate_block_key, verify_admin_action, LedgerSigner};
use ledger_index::{build_index_entry, classify_category, extract_auto_keywords, extract_ciphertext_tokens, IndexingCoordinator};
use ledger_keystore::KeyStore;
use ledger_offchain::OffChainStore;
use ledger_store::LedgerDb;
use ledger_validation::{ValidationEngine, ValidationReport};

const GENESIS_DATA: &str = "GENESIS";

/// One element of a `batch_append` call. Borrows its signer so the caller
/// does not need to clone secret key material per block.
pub struct AppendRequest<'a> {
    pub payload: &'a [u8],
    pub signer_fingerprint: KeyFingerprint,
    pub signer: &'a LedgerSigner,
    pub custom_metadata: BTreeMap<String, serde_json::Value>,
}

/// The append-only chain: genesis, append/batch_append, rollback, and the
/// orchestration that ties KeyStore, OffChainStore, and indexing together
/// around a single `LedgerDb`.
///
/// Indexing runs on a dedicated single-thread executor, separate from
/// whatever runtime the caller's own async code lives on, so a slow or
/// buggy index build can never starve the caller's request path.
pub struct ChainEngine {
    db: Arc<LedgerDb>,
    keystore: Arc<KeyStore>,
    offchain: Arc<OffChainStore>,
    validation: ValidationEngine,
    coordinator: Arc<IndexingCoordinator>,
    indexing_handle: tokio::runtime::Handle,
    _indexing_thread: std::thread::JoinHandle<()>,
}

fn spawn_indexing_runtime() -> (tokio::runtime::Handle, std::thread::JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let thread = std::thread::Builder::new()
        .name("ledger-indexing".into())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build indexing runtime");
            tx.send(runtime.handle().clone()).expect("indexing runtime handle receiver dropped");
            runtime.block_on(std::future::pending::<()>());
        })
        .expect("failed to spawn indexing thread");
    let handle = rx.recv().expect("indexing thread died before reporting its handle");
    (handle, thread)
}

impl ChainEngine {
    /// Open the chain over an already-open database. If the database has no
    /// blocks yet, mints block `0` signed by `genesis_signer`, whose
    /// fingerprint must already be a bootstrap-admin record in `keystore`.
    pub fn open(
        db: Arc<LedgerDb>,
        keystore: Arc<KeyStore>,
        offchain: Arc<OffChainStore>,
        genesis_signer_fingerprint: KeyFingerprint,
        genesis_signer: &LedgerSigner,
        now: Timestamp,
    ) -> Result<Self, LedgerError> {
        let coordinator = Arc::new(IndexingCoordinator::new(db.clone()));
        let (indexing_handle, _indexing_thread) = spawn_indexing_runtime();
        let validation = ValidationEngine::new(db.clone(), keystore.clone(), offchain.clone());

        let engine = Self {
            db,
            keystore,
            offchain,
            validation,
            coordinator,
            indexing_handle,
            _indexing_thread,
        };

        if engine.db.last_block()?.is_none() {
            engine.mint_genesis(genesis_signer_fingerprint, genesis_signer, now)?;
        }

        Ok(engine)
    }

    fn mint_genesis(&self, signer_fingerprint: KeyFingerprint, signer: &LedgerSigner, now: Timestamp) -> Result<Block, LedgerError> {
        let mut block = Block {
            number: 0,
            timestamp: now,
            data: GENESIS_DATA.to_string(),
            previous_hash: BlockHash::ZERO,
            hash: BlockHash::ZERO,
            signature: DilithiumSignature(vec![]),
            signer_public_key: signer_fingerprint,
            off_chain_ref: None,
            is_encrypted: false,
            auto_keywords: Vec::new(),
            category: Category::Other,
            custom_metadata: BTreeMap::new(),
        };
        block.hash = block_hash(&block.canonical_bytes());
        block.signature = signer.sign(block.hash.as_bytes()).map_err(|_| LedgerError::AuthenticationFailed)?;
        self.db.persist_block(&block)?;
        self.dispatch_indexing(block.clone());
        Ok(block)
    }

    fn dispatch_indexing(&self, block: Block) {
        let off_chain_threshold = ledger_core::config::get().off_chain_threshold_bytes as usize;
        let coordinator = self.coordinator.clone();
        if let Err(e) = coordinator.submit(&self.indexing_handle, coordinator.clone(), block, move |b| {
            build_index_entry(b, off_chain_threshold)
        }) {
            tracing::warn!(error = %e, "failed to submit block for indexing");
        }
    }

    /// Decide on-chain vs. off-chain placement, extract keywords/category,
    /// and build a fully hashed and signed block at `number`. Does not
    /// persist or dispatch indexing; the caller does that once it knows
    /// whether it's appending a single block or a batch.
    ///
    /// Returns the block together with its off-chain block key when the
    /// payload went off-chain. The engine never stores this key: the caller
    /// is responsible for retaining it if the payload needs to be read back
    /// via `read_payload`, the same way `read_payload` itself requires the
    /// caller to supply it.
    fn build_block(
        &self,
        number: BlockNumber,
        previous_hash: BlockHash,
        payload: &[u8],
        signer_fingerprint: KeyFingerprint,
        signer: &LedgerSigner,
        custom_metadata: BTreeMap<String, serde_json::Value>,
        cfg: &ledger_core::Config,
        now: Timestamp,
    ) -> Result<(Block, Option<[u8; 32]>), LedgerError> {
        let text = String::from_utf8_lossy(payload).into_owned();
        let payload_len = payload.len() as u64;

        let (data, off_chain_ref, is_encrypted, block_key, auto_keywords) = if payload_len >= cfg.off_chain_threshold_bytes {
            let max_off_chain = cfg.off_chain_max_bytes.min(ledger_core::OFF_CHAIN_ABSOLUTE_MAX_BYTES);
            if payload_len > max_off_chain {
                return Err(LedgerError::PayloadTooLarge { got: payload_len, max: max_off_chain });
            }
            let block_key = generate_block_key();
            let (record, ciphertext) = self.offchain.write(number, signer_fingerprint, signer, &block_key, payload, now)?;
            let descriptor = format!("off-chain payload, ciphertext_hash={}", record.ciphertext_hash);
            // Keywords for an encrypted block must never be derivable from its
            // plaintext: tokenize the ciphertext itself, not `text`.
            let auto_keywords = extract_ciphertext_tokens(&ciphertext);
            (descriptor, Some(OffChainRef { id: record.id.clone(), ciphertext_hash: record.ciphertext_hash }), true, Some(block_key), auto_keywords)
        } else {
            if payload_len > cfg.max_on_chain_bytes || text.chars().count() > cfg.max_on_chain_chars {
                return Err(LedgerError::PayloadTooLarge { got: payload_len, max: cfg.max_on_chain_bytes });
            }
            let auto_keywords = extract_auto_keywords(&text);
            (text.clone(), None, false, None, auto_keywords)
        };

        let category = classify_category(&text);

        let mut block = Block {
            number,
            timestamp: now,
            data,
            previous_hash,
            hash: BlockHash::ZERO,
            signature: DilithiumSignature(vec![]),
            signer_public_key: signer_fingerprint,
            off_chain_ref,
            is_encrypted,
            auto_keywords,
            category,
            custom_metadata,
        };
        block.hash = block_hash(&block.canonical_bytes());
        block.signature = signer.sign(block.hash.as_bytes()).map_err(|_| LedgerError::AuthenticationFailed)?;
        Ok((block, block_key))
    }

    /// Append a single block. Held entirely under `LedgerDb`'s write-serialization
    /// mutex: the tail read, number allocation, and persist are one critical
    /// section, so two concurrent callers can never be assigned the same number
    /// and the "allocation conflict, retry" case the contract describes cannot
    /// arise in-process.
    pub fn append(
        &self,
        payload: &[u8],
        signer_fingerprint: KeyFingerprint,
        signer: &LedgerSigner,
        custom_metadata: BTreeMap<String, serde_json::Value>,
        now: Timestamp,
    ) -> Result<(Block, Option<[u8; 32]>), LedgerError> {
        let _guard = self.db.lock_for_write();
        if !self.keystore.was_authorized_at(signer_fingerprint, now) {
            return Err(LedgerError::Unauthorized(signer_fingerprint.to_string()));
        }
        let cfg = ledger_core::config::get();
        let previous_hash = self.db.last_block()?.map(|b| b.hash).unwrap_or(BlockHash::ZERO);
        let number = self.db.next_block_number()?;

        let (block, block_key) = self.build_block(number, previous_hash, payload, signer_fingerprint, signer, custom_metadata, &cfg, now)?;
        self.db.persist_block(&block)?;
        self.dispatch_indexing(block.clone());
        Ok((block, block_key))
    }

    /// Append a run of blocks in one transaction. Each element is validated
    /// independently (a bad signer or oversized payload partway through
    /// aborts the whole batch before anything is persisted).
    pub fn batch_append(&self, requests: Vec<AppendRequest<'_>>, now: Timestamp) -> Result<Vec<(Block, Option<[u8; 32]>)>, LedgerError> {
        let _guard = self.db.lock_for_write();
        let cfg = ledger_core::config::get();
        let mut previous_hash = self.db.last_block()?.map(|b| b.hash).unwrap_or(BlockHash::ZERO);
        let mut number = self.db.next_block_number()?;
        let mut blocks = Vec::with_capacity(requests.len());

        for req in requests {
            if !self.keystore.was_authorized_at(req.signer_fingerprint, now) {
                return Err(LedgerError::Unauthorized(req.signer_fingerprint.to_string()));
            }
            let (block, block_key) =
                self.build_block(number, previous_hash, req.payload, req.signer_fingerprint, req.signer, req.custom_metadata, &cfg, now)?;
            previous_hash = block.hash;
            number += 1;
            blocks.push((block, block_key));
        }

        self.db.persist_blocks(&blocks.iter().map(|(b, _)| b.clone()).collect::<Vec<_>>())?;
        for (block, _) in &blocks {
            self.dispatch_indexing(block.clone());
        }
        Ok(blocks)
    }

    /// Remove every block after `target_number`, deleting each one's
    /// off-chain sidecar last. Requires a SUPER_ADMIN signature over
    /// `(target_number, "rollback")`.
    pub fn rollback_to(
        &self,
        target_number: i64,
        caller_fingerprint: KeyFingerprint,
        caller_public_key: &DilithiumPublicKey,
        admin_signature: &DilithiumSignature,
        reason: &str,
        now: Timestamp,
    ) -> Result<u64, LedgerError> {
        if target_number < 0 {
            return Err(LedgerError::RollbackPastGenesis { target: target_number });
        }
        let target_number = target_number as BlockNumber;

        let caller_role = self
            .keystore
            .current_role(caller_fingerprint, now)
            .ok_or_else(|| LedgerError::Unauthorized(caller_fingerprint.to_string()))?;
        if caller_role != Role::SuperAdmin {
            return Err(LedgerError::InsufficientRole {
                need: Role::SuperAdmin.as_str().into(),
                have: caller_role.as_str().into(),
            });
        }
        verify_admin_action(caller_public_key, "rollback", &target_number.to_be_bytes(), true, reason, admin_signature)
            .map_err(|_| LedgerError::InvalidAdminSignature)?;

        let _guard = self.db.lock_for_write();
        let tail = self.db.last_block()?.ok_or_else(|| LedgerError::NotFound("chain is empty".into()))?;
        if target_number > tail.number {
            return Err(LedgerError::InvalidArgument(format!(
                "rollback target {target_number} is ahead of the current tail {}",
                tail.number
            )));
        }

        let mut off_chain_ids = Vec::new();
        self.db.stream_blocks_after(target_number, |block| {
            if let Some(r) = &block.off_chain_ref {
                off_chain_ids.push(r.id.clone());
            }
            ControlFlow::Continue(())
        })?;

        let removed = self.db.delete_blocks_after(target_number)?;
        self.db.delete_index_entries_after(target_number)?;

        for id in off_chain_ids {
            if let Some(record) = self.db.get_offchain_record(&id)? {
                self.offchain.delete_file(&record)?;
            }
            self.db.delete_offchain_record(&id)?;
        }

        let new_tail = self.db.last_block()?.map(|b| b.number);
        if new_tail != Some(target_number) && !(target_number == 0 && new_tail == Some(0)) {
            return Err(LedgerError::StorageError(format!(
                "post-rollback tail {:?} does not match target {target_number}",
                new_tail
            )));
        }

        Ok(removed)
    }

    /// Read a block's plaintext payload, decrypting its off-chain sidecar if
    /// necessary. `block_key` is required exactly when `block.off_chain_ref`
    /// is `Some`; the engine never stores or derives it on the caller's behalf.
    pub fn read_payload(&self, block: &Block, block_key: Option<&[u8; 32]>) -> Result<Vec<u8>, LedgerError> {
        match &block.off_chain_ref {
            None => Ok(block.data.clone().into_bytes()),
            Some(off_chain_ref) => {
                let block_key = block_key.ok_or_else(|| {
                    LedgerError::InvalidArgument("block key required to read an off-chain payload".into())
                })?;
                let signer_public_key = self
                    .keystore
                    .public_key_for(block.signer_public_key)
                    .ok_or_else(|| LedgerError::NotFound(block.signer_public_key.to_string()))?;
                let record = self
                    .offchain
                    .get_record(&off_chain_ref.id)?
                    .ok_or_else(|| LedgerError::OffChainUnavailable(off_chain_ref.id.clone()))?;
                self.offchain.verify_and_decrypt(
                    &record,
                    block.number,
                    block.signer_public_key,
                    &signer_public_key,
                    off_chain_ref.ciphertext_hash,
                    block_key,
                )
            }
        }
    }

    pub fn validate_detailed(&self, decrypt: Option<&dyn Fn(&Block) -> Option<[u8; 32]>>) -> Result<ValidationReport, LedgerError> {
        self.validation.validate(decrypt)
    }

    pub fn coordinator(&self) -> &Arc<IndexingCoordinator> {
        &self.coordinator
    }

    pub fn db(&self) -> &Arc<LedgerDb> {
        &self.db
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    pub fn offchain(&self) -> &Arc<OffChainStore> {
        &self.offchain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_crypto::KeyPair;

    fn open_engine(tmp: &tempfile::TempDir) -> (ChainEngine, KeyPair) {
        let db = Arc::new(LedgerDb::open(tmp.path().join("db")).unwrap());
        let keystore = Arc::new(KeyStore::open(db.clone()).unwrap());
        let offchain = Arc::new(OffChainStore::open(db.clone(), tmp.path().join("offchain")).unwrap());
        let root = KeyPair::generate();
        let bootstrap = keystore.bootstrap(root.public_key.clone(), "root".into(), 1_000).unwrap();
        let signer = LedgerSigner::from_secret_key_bytes(root.secret_key_bytes().to_vec(), root.public_key.0.clone());
        let engine = ChainEngine::open(db, keystore, offchain, bootstrap.fingerprint, &signer, 1_000).unwrap();
        (engine, root)
    }

    #[test]
    fn open_mints_genesis_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, _root) = open_engine(&tmp);
        assert_eq!(engine.db.count_blocks(), 1);
        let genesis = engine.db.find_block_by_number(0).unwrap().unwrap();
        assert_eq!(genesis.data, GENESIS_DATA);
    }

    #[test]
    fn append_chains_to_previous_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, root) = open_engine(&tmp);
        let bootstrap_fp = engine.db.find_block_by_number(0).unwrap().unwrap().signer_public_key;
        let signer = LedgerSigner::from_secret_key_bytes(root.secret_key_bytes().to_vec(), root.public_key.0.clone());

        let genesis = engine.db.find_block_by_number(0).unwrap().unwrap();
        let (block, block_key) = engine.append(b"hello ledger", bootstrap_fp, &signer, BTreeMap::new(), 2_000).unwrap();
        assert!(block_key.is_none(), "short payload should stay on-chain");
        assert_eq!(block.number, 1);
        assert_eq!(block.previous_hash, genesis.hash);
    }

    #[test]
    fn unauthorized_signer_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, _root) = open_engine(&tmp);
        let stranger = KeyPair::generate();
        let signer = LedgerSigner::from_secret_key_bytes(stranger.secret_key_bytes().to_vec(), stranger.public_key.0.clone());
        let result = engine.append(b"data", stranger.fingerprint, &signer, BTreeMap::new(), 2_000);
        assert!(matches!(result, Err(LedgerError::Unauthorized(_))));
    }
}
