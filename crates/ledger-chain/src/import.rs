use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use ledger_core::{
    AuthorizedKey, Block, BlockHash, Category, DilithiumSignature, KeyFingerprint, LedgerError,
    OffChainRecord, OffChainRef, Timestamp, HASH_ALGORITHM, SIGNATURE_ALGORITHM,
};
use ledger_crypto::verify_signature;

use crate::chain::ChainEngine;

#[derive(Deserialize)]
struct ImportedHeader {
    hash_algorithm: String,
    signature_algorithm: String,
}

#[derive(Deserialize)]
struct ImportedOffChainRef {
    id: String,
    ciphertext_hash: BlockHash,
    plaintext_size: u64,
    signature: DilithiumSignature,
    created_at: Timestamp,
    encryption_nonce: [u8; 12],
}

#[derive(Deserialize)]
struct ImportedBlockLine {
    number: u64,
    timestamp: Timestamp,
    data: String,
    previous_hash: BlockHash,
    hash: BlockHash,
    signature: DilithiumSignature,
    signer_public_key: KeyFingerprint,
    off_chain_ref: Option<ImportedOffChainRef>,
    is_encrypted: bool,
    auto_keywords: Vec<String>,
    category: Category,
    custom_metadata: BTreeMap<String, Value>,
}

/// Replays an `export_chain` document onto `engine`'s (empty) store: the
/// full authorized-key history first, then every block in order, each
/// checked against its predecessor and against the key history at its own
/// `timestamp` rather than at import time. `offchain_export_dir` is the
/// sidecar directory written alongside the export file. Fails fast on the
/// first invalid block, leaving the store exactly as it was for blocks
/// already imported — there is no partial rollback, so callers importing
/// into a live store should do so into a fresh `LedgerDb` and swap it in
/// atomically once `import_chain` returns `Ok`.
pub fn import_chain(engine: &ChainEngine, path: &Path, offchain_export_dir: &Path) -> Result<u64, LedgerError> {
    let file = File::open(path).map_err(|e| LedgerError::StorageError(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut previous_hash = BlockHash::ZERO;
    let mut expected_number = 0u64;
    let mut imported = 0u64;
    let mut seen_header = false;

    for line in reader.lines() {
        let line = line.map_err(|e| LedgerError::StorageError(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|e| LedgerError::StorageError(e.to_string()))?;
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();

        match kind {
            "header" => {
                let header: ImportedHeader =
                    serde_json::from_value(value).map_err(|e| LedgerError::StorageError(e.to_string()))?;
                if header.hash_algorithm != HASH_ALGORITHM || header.signature_algorithm != SIGNATURE_ALGORITHM {
                    return Err(LedgerError::InvalidArgument(format!(
                        "import document algorithm mismatch: expected {HASH_ALGORITHM}/{SIGNATURE_ALGORITHM}, got {}/{}",
                        header.hash_algorithm, header.signature_algorithm
                    )));
                }
                seen_header = true;
            }
            "key" => {
                let record: AuthorizedKey =
                    serde_json::from_value(value).map_err(|e| LedgerError::StorageError(e.to_string()))?;
                engine.keystore().import_record(record)?;
            }
            "block" => {
                if !seen_header {
                    return Err(LedgerError::InvalidArgument("import document is missing its header".into()));
                }
                let imported_block: ImportedBlockLine =
                    serde_json::from_value(value).map_err(|e| LedgerError::StorageError(e.to_string()))?;
                import_one_block(engine, imported_block, &mut previous_hash, &mut expected_number, offchain_export_dir)?;
                imported += 1;
            }
            other => {
                return Err(LedgerError::InvalidArgument(format!("unrecognized import line kind '{other}'")));
            }
        }
    }

    Ok(imported)
}

fn import_one_block(
    engine: &ChainEngine,
    imported: ImportedBlockLine,
    previous_hash: &mut BlockHash,
    expected_number: &mut u64,
    offchain_export_dir: &Path,
) -> Result<(), LedgerError> {
    if imported.number != *expected_number {
        return Err(LedgerError::MissingParent(imported.number));
    }
    if imported.number > 0 && imported.previous_hash != *previous_hash {
        return Err(LedgerError::MissingParent(imported.number));
    }

    let signer_public_key = engine
        .keystore()
        .public_key_for(imported.signer_public_key)
        .ok_or_else(|| LedgerError::NotFound(imported.signer_public_key.to_string()))?;
    verify_signature(&signer_public_key, imported.hash.as_bytes(), &imported.signature)
        .map_err(|_| LedgerError::InvalidAdminSignature)?;
    if !engine.keystore().was_authorized_at(imported.signer_public_key, imported.timestamp) {
        return Err(LedgerError::Unauthorized(imported.signer_public_key.to_string()));
    }

    let off_chain_ref = match imported.off_chain_ref {
        None => None,
        Some(r) => {
            let src = offchain_export_dir.join(format!("{}.bin", r.id));
            let dest_dir = engine.offchain().root_path().join(imported.number.to_string());
            fs::create_dir_all(&dest_dir).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;
            let dest = dest_dir.join(format!("{}.bin", r.id));
            fs::copy(&src, &dest).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;

            let record = OffChainRecord {
                // `r.id` is the ciphertext hash hex recorded at append time; it
                // must be reused verbatim, not reconstructed, so the imported
                // block's `off_chain_ref.id` matches the hashed original exactly.
                id: r.id.clone(),
                file_path: dest
                    .strip_prefix(engine.offchain().root_path())
                    .unwrap_or(&dest)
                    .to_string_lossy()
                    .into_owned(),
                plaintext_size: r.plaintext_size,
                ciphertext_hash: r.ciphertext_hash,
                signature: r.signature,
                created_at: r.created_at,
                encryption_nonce: r.encryption_nonce,
            };
            engine.db().put_offchain_record(&record)?;
            Some(OffChainRef { id: record.id, ciphertext_hash: record.ciphertext_hash })
        }
    };

    let block = Block {
        number: imported.number,
        timestamp: imported.timestamp,
        data: imported.data,
        previous_hash: imported.previous_hash,
        hash: imported.hash,
        signature: imported.signature,
        signer_public_key: imported.signer_public_key,
        off_chain_ref,
        is_encrypted: imported.is_encrypted,
        auto_keywords: imported.auto_keywords,
        category: imported.category,
        custom_metadata: imported.custom_metadata,
    };
    engine.db().persist_block(&block)?;

    *previous_hash = block.hash;
    *expected_number += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Arc;

    use ledger_crypto::{KeyPair, LedgerSigner};
    use ledger_keystore::KeyStore;
    use ledger_offchain::OffChainStore;
    use ledger_store::LedgerDb;

    fn open_engine(tmp: &tempfile::TempDir) -> ChainEngine {
        let db = Arc::new(LedgerDb::open(tmp.path().join("db")).unwrap());
        let keystore = Arc::new(KeyStore::open(db.clone()).unwrap());
        let offchain = Arc::new(OffChainStore::open(db.clone(), tmp.path().join("offchain")).unwrap());
        let root = KeyPair::generate();
        let bootstrap = keystore.bootstrap(root.public_key.clone(), "root".into(), 1_000).unwrap();
        let signer = LedgerSigner::from_secret_key_bytes(root.secret_key_bytes().to_vec(), root.public_key.0.clone());
        ChainEngine::open(db, keystore, offchain, bootstrap.fingerprint, &signer, 1_000).unwrap()
    }

    #[test]
    fn rejects_document_with_mismatched_algorithm_header() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(&tmp);

        let path = tmp.path().join("bad-export.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"kind":"header","version":1,"exported_at":0,"block_count":0,"genesis_hash":"{}","hash_algorithm":"MD5","signature_algorithm":"RSA"}}"#, BlockHash::ZERO).unwrap();

        let offchain_dir = tmp.path().join("export-offchain");
        let result = import_chain(&engine, &path, &offchain_dir);
        assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
    }
}
