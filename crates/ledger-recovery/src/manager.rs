use std::path::Path;

use ledger_chain::{export_chain_prefix, ChainEngine};
use ledger_core::{
    AuthorizedKey, Block, BlockNumber, DilithiumPublicKey, DilithiumSignature, KeyFingerprint,
    LedgerError, Timestamp, RECOVERY_DIAGNOSIS_SAMPLE_CAP,
};
use ledger_validation::BlockFinding;

/// Result of `RecoveryManager::diagnose`: counts over the whole chain plus a
/// bounded sample of corrupted blocks, sorted by ascending block number so
/// `sample.first()` is always the earliest corruption. Never holds more than
/// `RECOVERY_DIAGNOSIS_SAMPLE_CAP` findings regardless of how many blocks are
/// actually corrupted.
#[derive(Clone, Debug)]
pub struct DiagnosisReport {
    pub valid_count: u64,
    pub corrupted_count: u64,
    pub sample: Vec<BlockFinding>,
}

impl DiagnosisReport {
    pub fn is_compliant(&self) -> bool {
        self.corrupted_count == 0
    }

    /// The earliest corrupted block number, if any. Truncation is restored
    /// to from this block onward, since removing everything from here on is
    /// the only way a suffix-truncating rollback can clear every corrupted
    /// block in `sample` (and, by construction, every corrupted block that
    /// came after it).
    pub fn earliest_corruption(&self) -> Option<BlockNumber> {
        self.sample.first().map(|f| f.number)
    }
}

/// Outcome of `RecoveryManager::recover`.
#[derive(Debug)]
pub enum RecoveryOutcome {
    AlreadyCompliant,
    Reauthorized { fingerprint: KeyFingerprint },
    RolledBack { removed: u64, kept_through: BlockNumber },
    PartiallyExported { exported_blocks: u64 },
}

/// Caller-supplied material for whichever recovery strategies apply.
/// `recover` tries them in the order the contract specifies, using whichever
/// of these are present and skipping a strategy entirely when its inputs are
/// absent, rather than treating a missing input as a hard error.
#[derive(Default)]
pub struct RecoveryRequest<'a> {
    /// The deleted key's original record, if the caller still has it. Supplying
    /// this attempts strategy 1 (re-authorize) first.
    pub reauthorize_candidate: Option<AuthorizedKey>,
    /// Admin credentials for strategy 2 (smart rollback), required to be
    /// present together or not at all.
    pub rollback_admin: Option<RollbackAdmin<'a>>,
    /// Destination for strategy 3 (partial export), tried only if both
    /// earlier strategies were unavailable or failed to restore compliance.
    pub partial_export_path: Option<&'a Path>,
    pub now: Timestamp,
}

pub struct RollbackAdmin<'a> {
    pub caller_fingerprint: KeyFingerprint,
    pub caller_public_key: &'a DilithiumPublicKey,
    pub admin_signature: &'a DilithiumSignature,
    pub reason: &'a str,
}

/// Diagnoses and repairs chain corruption per §4.8: re-authorize the
/// offending key if material is available, else roll back to the longest
/// valid prefix with an admin signature, else archive that prefix and leave
/// the live chain marked non-compliant.
pub struct RecoveryManager<'a> {
    engine: &'a ChainEngine,
}

impl<'a> RecoveryManager<'a> {
    pub fn new(engine: &'a ChainEngine) -> Self {
        Self { engine }
    }

    pub fn diagnose(&self, decrypt: Option<&dyn Fn(&Block) -> Option<[u8; 32]>>) -> Result<DiagnosisReport, LedgerError> {
        let report = self.engine.validate_detailed(decrypt)?;
        let mut corrupted: Vec<BlockFinding> = report.corrupted_blocks().cloned().collect();
        corrupted.sort_by_key(|f| f.number);
        let corrupted_count = corrupted.len() as u64;
        corrupted.truncate(RECOVERY_DIAGNOSIS_SAMPLE_CAP);
        Ok(DiagnosisReport { valid_count: report.valid_count, corrupted_count, sample: corrupted })
    }

    /// Strategy 1: persist `candidate`'s original authorization verbatim,
    /// then re-diagnose. Returns the refreshed diagnosis so the caller can
    /// tell whether compliance was actually restored (re-authorizing the
    /// wrong key, or a key that does not cover every corrupted block's
    /// timestamp, leaves some corruption behind).
    pub fn reauthorize(&self, candidate: AuthorizedKey, decrypt: Option<&dyn Fn(&Block) -> Option<[u8; 32]>>) -> Result<DiagnosisReport, LedgerError> {
        self.engine.keystore().import_record(candidate)?;
        self.diagnose(decrypt)
    }

    /// Strategy 2: roll back to one block before the earliest corruption in
    /// `diagnosis`, under the same admin-signature gate as a direct
    /// `ChainEngine::rollback_to` call.
    pub fn smart_rollback(&self, diagnosis: &DiagnosisReport, admin: &RollbackAdmin<'_>, now: Timestamp) -> Result<RecoveryOutcome, LedgerError> {
        let earliest = diagnosis
            .earliest_corruption()
            .ok_or_else(|| LedgerError::InvalidArgument("diagnosis reports no corruption to roll back from".into()))?;
        let target = earliest as i64 - 1;
        let removed = self.engine.rollback_to(
            target,
            admin.caller_fingerprint,
            admin.caller_public_key,
            admin.admin_signature,
            admin.reason,
            now,
        )?;
        Ok(RecoveryOutcome::RolledBack { removed, kept_through: target.max(0) as BlockNumber })
    }

    /// Strategy 3: archive the longest valid prefix to `path` without
    /// touching the live (still-corrupted) chain.
    pub fn partial_export(&self, diagnosis: &DiagnosisReport, path: &Path, exported_at: Timestamp) -> Result<RecoveryOutcome, LedgerError> {
        let earliest = diagnosis
            .earliest_corruption()
            .ok_or_else(|| LedgerError::InvalidArgument("diagnosis reports no corruption to export around".into()))?;
        if earliest == 0 {
            return Err(LedgerError::InvalidArgument("genesis itself is corrupted; no valid prefix exists to export".into()));
        }
        let exported = export_chain_prefix(self.engine, path, exported_at, Some(earliest - 1))?;
        Ok(RecoveryOutcome::PartiallyExported { exported_blocks: exported })
    }

    /// Runs the full decision procedure: diagnose, then try each strategy in
    /// order for which `request` supplies the needed material, stopping at
    /// the first that restores (or, for partial export, accepts) the
    /// chosen invariant.
    pub fn recover(&self, request: RecoveryRequest<'_>, decrypt: Option<&dyn Fn(&Block) -> Option<[u8; 32]>>) -> Result<RecoveryOutcome, LedgerError> {
        let diagnosis = self.diagnose(decrypt)?;
        if diagnosis.is_compliant() {
            return Ok(RecoveryOutcome::AlreadyCompliant);
        }

        if let Some(candidate) = request.reauthorize_candidate {
            let fingerprint = candidate.fingerprint;
            let refreshed = self.reauthorize(candidate, decrypt)?;
            if refreshed.is_compliant() {
                return Ok(RecoveryOutcome::Reauthorized { fingerprint });
            }
        }

        if let Some(admin) = &request.rollback_admin {
            let refreshed = self.diagnose(decrypt)?;
            if let Ok(outcome) = self.smart_rollback(&refreshed, admin, request.now) {
                return Ok(outcome);
            }
        }

        if let Some(path) = request.partial_export_path {
            let refreshed = self.diagnose(decrypt)?;
            return self.partial_export(&refreshed, path, request.now);
        }

        Err(LedgerError::InvalidArgument(
            "chain is corrupted but the request supplied no recovery material to act on".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_crypto::{KeyPair, LedgerSigner};
    use ledger_keystore::KeyStore;
    use ledger_offchain::OffChainStore;
    use ledger_store::LedgerDb;
    use std::collections::BTreeMap;
    use std::sync::Arc;

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
    fn diagnose_reports_clean_chain_as_compliant() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, root) = open_engine(&tmp);
        let bootstrap_fp = engine.db().find_block_by_number(0).unwrap().unwrap().signer_public_key;
        let signer = LedgerSigner::from_secret_key_bytes(root.secret_key_bytes().to_vec(), root.public_key.0.clone());
        engine.append(b"entry", bootstrap_fp, &signer, BTreeMap::new(), 2_000).unwrap();

        let manager = RecoveryManager::new(&engine);
        let diagnosis = manager.diagnose(None).unwrap();
        assert!(diagnosis.is_compliant());
        assert_eq!(diagnosis.valid_count, 2);
    }

    #[test]
    fn reauthorize_restores_compliance_after_forced_key_deletion() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, root) = open_engine(&tmp);
        let bootstrap_fp = engine.db().find_block_by_number(0).unwrap().unwrap().signer_public_key;

        let user = KeyPair::generate();
        let registered = engine
            .keystore()
            .register(bootstrap_fp, user.public_key.clone(), "alice".into(), ledger_core::Role::User, 1_500)
            .unwrap();
        let user_signer = LedgerSigner::from_secret_key_bytes(user.secret_key_bytes().to_vec(), user.public_key.0.clone());
        engine.append(b"signed by alice", registered.fingerprint, &user_signer, BTreeMap::new(), 2_000).unwrap();

        // force-delete alice's key without touching the blocks she already signed
        engine
            .db()
            .delete_key_records_for(registered.fingerprint)
            .unwrap();
        // KeyStore's cache is independent of the db once primed; re-open a
        // fresh store over the same db to observe the deletion.
        let keystore2 = Arc::new(KeyStore::open(engine.db().clone()).unwrap());
        assert!(!keystore2.was_authorized_at(registered.fingerprint, 2_000));

        let manager_db_engine = {
            let offchain = Arc::new(OffChainStore::open(engine.db().clone(), tmp.path().join("offchain2")).unwrap());
            let signer2 = LedgerSigner::from_secret_key_bytes(root.secret_key_bytes().to_vec(), root.public_key.0.clone());
            ChainEngine::open(engine.db().clone(), keystore2, offchain, bootstrap_fp, &signer2, 1_000).unwrap()
        };

        let manager = RecoveryManager::new(&manager_db_engine);
        let diagnosis = manager.diagnose(None).unwrap();
        assert!(!diagnosis.is_compliant());

        let refreshed = manager.reauthorize(registered, None).unwrap();
        assert!(refreshed.is_compliant());
    }
}
