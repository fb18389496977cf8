use std::ops::ControlFlow;
use std::sync::Arc;

use ledger_core::{Block, BlockHash, LedgerError};
use ledger_crypto::{block_hash, verify_signature};
use ledger_keystore::KeyStore;
use ledger_offchain::OffChainStore;
use ledger_store::LedgerDb;

use crate::status::{BlockFinding, BlockStatus, ValidationReport};

/// Verifies the append-only chain's structural and off-chain invariants.
///
/// Runs in two streaming passes so neither requires more than one block (or
/// one off-chain file) resident at a time: pass 1 walks every block in
/// number order checking hash, linkage, signature, and point-in-time
/// authorization; pass 2 walks only blocks carrying an off-chain reference
/// and replays the `OffChainStore` verification contract against each.
pub struct ValidationEngine {
    db: Arc<LedgerDb>,
    keystore: Arc<KeyStore>,
    offchain: Arc<OffChainStore>,
}

impl ValidationEngine {
    pub fn new(db: Arc<LedgerDb>, keystore: Arc<KeyStore>, offchain: Arc<OffChainStore>) -> Self {
        Self { db, keystore, offchain }
    }

    /// Full two-pass validation. `decrypt` supplies the block key for a
    /// block's off-chain payload, if the caller holds one; blocks whose key
    /// is unavailable skip the AEAD-decrypt step of pass 2 and are not
    /// marked `OffChainTampered` on that basis alone — only the hash and
    /// signature of the sidecar are checked.
    pub fn validate(
        &self,
        decrypt: Option<&dyn Fn(&Block) -> Option<[u8; 32]>>,
    ) -> Result<ValidationReport, LedgerError> {
        let mut findings: Vec<BlockFinding> = Vec::new();
        let mut total_blocks = 0u64;
        let mut valid_count = 0u64;
        let mut previous_hash = BlockHash::ZERO;

        self.db.stream_all_blocks(|block| {
            total_blocks += 1;
            let status = self.check_block(&block, previous_hash);
            previous_hash = block.hash;
            if status == BlockStatus::Valid {
                valid_count += 1;
            } else {
                findings.push(BlockFinding { number: block.number, status });
            }
            ControlFlow::Continue(())
        })?;

        let structurally_intact = findings.iter().all(|f| f.status.is_structurally_intact());

        self.db.stream_blocks_with_off_chain(|block| {
            if let Some(status) = self.check_off_chain(&block, decrypt) {
                if let Some(existing) = findings.iter_mut().find(|f| f.number == block.number) {
                    existing.status = status;
                } else {
                    valid_count = valid_count.saturating_sub(1);
                    findings.push(BlockFinding { number: block.number, status });
                }
            }
            ControlFlow::Continue(())
        })?;

        let fully_compliant = findings.is_empty();

        Ok(ValidationReport {
            total_blocks,
            valid_count,
            findings,
            structurally_intact,
            fully_compliant,
        })
    }

    fn check_block(&self, block: &Block, expected_previous_hash: BlockHash) -> BlockStatus {
        let recomputed = block_hash(&block.canonical_bytes());
        if recomputed != block.hash {
            return BlockStatus::InvalidHash;
        }
        if !block.is_genesis() && block.previous_hash != expected_previous_hash {
            return BlockStatus::InvalidLink;
        }
        let Some(signer_public_key) = self.keystore.public_key_for(block.signer_public_key) else {
            return BlockStatus::InvalidSignature;
        };
        if verify_signature(&signer_public_key, block.hash.as_bytes(), &block.signature).is_err() {
            return BlockStatus::InvalidSignature;
        }
        if !self.keystore.was_authorized_at(block.signer_public_key, block.timestamp) {
            return BlockStatus::UnauthorizedAtTimestamp;
        }
        BlockStatus::Valid
    }

    /// `None` means the off-chain payload verified clean (or the block had
    /// none); `Some(status)` reports a failure of the §4.3 contract.
    fn check_off_chain(
        &self,
        block: &Block,
        decrypt: Option<&dyn Fn(&Block) -> Option<[u8; 32]>>,
    ) -> Option<BlockStatus> {
        let off_chain_ref = block.off_chain_ref.as_ref()?;
        let record = match self.offchain.get_record(&off_chain_ref.id) {
            Ok(Some(record)) => record,
            Ok(None) => return Some(BlockStatus::OffChainUnavailable),
            Err(_) => return Some(BlockStatus::OffChainUnavailable),
        };

        let Some(signer_public_key) = self.keystore.public_key_for(block.signer_public_key) else {
            return Some(BlockStatus::InvalidSignature);
        };

        let Some(block_key) = decrypt.and_then(|f| f(block)) else {
            // No key material: verify only hash and signature, per the
            // contract's steps 1-2, and skip step 3.
            return match self.verify_commitment_only(&record, off_chain_ref.ciphertext_hash, &signer_public_key, block.number) {
                Ok(()) => None,
                Err(status) => Some(status),
            };
        };

        match self.offchain.verify_and_decrypt(
            &record,
            block.number,
            block.signer_public_key,
            &signer_public_key,
            off_chain_ref.ciphertext_hash,
            &block_key,
        ) {
            Ok(_) => None,
            Err(LedgerError::OffChainHashMismatch(_)) => Some(BlockStatus::OffChainTampered),
            Err(LedgerError::OffChainSignatureInvalid(_)) => Some(BlockStatus::OffChainTampered),
            Err(LedgerError::OffChainTampered(_)) => Some(BlockStatus::OffChainTampered),
            Err(_) => Some(BlockStatus::OffChainUnavailable),
        }
    }

    fn verify_commitment_only(
        &self,
        record: &ledger_core::OffChainRecord,
        on_chain_hash: BlockHash,
        signer_public_key: &ledger_core::DilithiumPublicKey,
        block_number: ledger_core::BlockNumber,
    ) -> Result<(), BlockStatus> {
        if record.ciphertext_hash != on_chain_hash {
            return Err(BlockStatus::OffChainTampered);
        }
        verify_signature(signer_public_key, record.ciphertext_hash.as_bytes(), &record.signature)
            .map_err(|_| BlockStatus::OffChainTampered)?;
        let _ = block_number;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_crypto::KeyPair;

    fn open(tmp: &tempfile::TempDir) -> (Arc<LedgerDb>, Arc<KeyStore>, Arc<OffChainStore>) {
        let db = Arc::new(LedgerDb::open(tmp.path().join("db")).unwrap());
        let keystore = Arc::new(KeyStore::open(db.clone()).unwrap());
        let offchain = Arc::new(OffChainStore::open(db.clone(), tmp.path().join("offchain")).unwrap());
        (db, keystore, offchain)
    }

    fn genesis_block(hash: BlockHash, signer: ledger_core::KeyFingerprint) -> Block {
        Block {
            number: 0,
            timestamp: 100,
            data: "genesis".into(),
            previous_hash: BlockHash::ZERO,
            hash,
            signature: ledger_core::DilithiumSignature(vec![]),
            signer_public_key: signer,
            off_chain_ref: None,
            is_encrypted: false,
            auto_keywords: vec![],
            category: ledger_core::Category::Other,
            custom_metadata: Default::default(),
        }
    }

    #[test]
    fn clean_single_block_chain_is_fully_compliant() {
        let tmp = tempfile::tempdir().unwrap();
        let (db, keystore, offchain) = open(&tmp);
        let root = KeyPair::generate();
        let bootstrap = keystore.bootstrap(root.public_key.clone(), "root".into(), 50).unwrap();

        let mut block = genesis_block(BlockHash::ZERO, bootstrap.fingerprint);
        block.hash = block_hash(&block.canonical_bytes());
        block.signature = root.sign(block.hash.as_bytes());
        db.persist_block(&block).unwrap();

        let engine = ValidationEngine::new(db, keystore, offchain);
        let report = engine.validate(None).unwrap();
        assert!(report.fully_compliant);
        assert!(report.structurally_intact);
        assert_eq!(report.valid_count, 1);
    }

    #[test]
    fn tampered_hash_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let (db, keystore, offchain) = open(&tmp);
        let root = KeyPair::generate();
        let bootstrap = keystore.bootstrap(root.public_key.clone(), "root".into(), 50).unwrap();

        let mut block = genesis_block(BlockHash::ZERO, bootstrap.fingerprint);
        block.hash = block_hash(&block.canonical_bytes());
        block.signature = root.sign(block.hash.as_bytes());
        block.data = "tampered after signing".into();
        db.persist_block(&block).unwrap();

        let engine = ValidationEngine::new(db, keystore, offchain);
        let report = engine.validate(None).unwrap();
        assert!(!report.fully_compliant);
        assert!(!report.structurally_intact);
        assert_eq!(report.findings[0].status, BlockStatus::InvalidHash);
    }
}
