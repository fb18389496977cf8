use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledger_core::{BlockHash, BlockNumber, DilithiumPublicKey, KeyFingerprint, LedgerError, OffChainRecord, Timestamp};
use ledger_crypto::{ciphertext_hash, decrypt, encrypt, verify_signature, LedgerSigner};
use ledger_store::LedgerDb;

/// Authenticated-encrypted file sidecars for payloads too large to keep
/// on-chain. Owns neither key material nor signing identity — both are
/// passed in per call, since the signer is whoever is appending the block.
pub struct OffChainStore {
    db: Arc<LedgerDb>,
    root: PathBuf,
}

fn aad(block_number: BlockNumber, signer_fingerprint: KeyFingerprint) -> Vec<u8> {
    let mut out = block_number.to_be_bytes().to_vec();
    out.extend_from_slice(signer_fingerprint.as_bytes());
    out
}

impl OffChainStore {
    pub fn open(db: Arc<LedgerDb>, root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;
        Ok(Self { db, root })
    }

    fn block_dir(&self, block_number: BlockNumber) -> PathBuf {
        self.root.join(block_number.to_string())
    }

    /// Write an encrypted sidecar and its signed commitment. Returns the
    /// record plus the ciphertext bytes themselves, since callers that must
    /// never touch the plaintext again (block-level keyword extraction) still
    /// need *something* content-derived to tokenize.
    pub fn write(
        &self,
        block_number: BlockNumber,
        signer_fingerprint: KeyFingerprint,
        signer: &LedgerSigner,
        block_key: &[u8; 32],
        plaintext: &[u8],
        now: Timestamp,
    ) -> Result<(OffChainRecord, Vec<u8>), LedgerError> {
        let nonce = ledger_crypto::generate_nonce();
        let aad_bytes = aad(block_number, signer_fingerprint);
        let ciphertext = encrypt(block_key, &nonce, plaintext, &aad_bytes)
            .map_err(|_| LedgerError::AuthenticationFailed)?;
        let hash = ciphertext_hash(&ciphertext);

        let signature = signer
            .sign(hash.as_bytes())
            .map_err(|_| LedgerError::AuthenticationFailed)?;

        let dir = self.block_dir(block_number);
        fs::create_dir_all(&dir).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;
        // The id is the ciphertext hash hex, not a random suffix: it is part of
        // `off_chain_ref`, which is hashed into the block body, so it must be a
        // pure function of the sidecar's content to survive an export/import
        // round trip byte-for-byte.
        let id = hash.to_hex();
        let file_path = dir.join(format!("{id}.bin"));

        let mut file = fs::File::create(&file_path).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;
        file.write_all(&ciphertext).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;
        file.sync_all().map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;

        let record = OffChainRecord {
            id,
            file_path: file_path
                .strip_prefix(&self.root)
                .unwrap_or(&file_path)
                .to_string_lossy()
                .into_owned(),
            plaintext_size: plaintext.len() as u64,
            ciphertext_hash: hash,
            signature,
            created_at: now,
            encryption_nonce: nonce,
        };
        self.db.put_offchain_record(&record)?;
        Ok((record, ciphertext))
    }

    /// Verify and decrypt a sidecar against its on-chain commitment. Called
    /// by `ValidationEngine`'s off-chain pass and by `import`/search level 3.
    pub fn verify_and_decrypt(
        &self,
        record: &OffChainRecord,
        block_number: BlockNumber,
        signer_fingerprint: KeyFingerprint,
        signer_public_key: &DilithiumPublicKey,
        on_chain_ciphertext_hash: BlockHash,
        block_key: &[u8; 32],
    ) -> Result<Vec<u8>, LedgerError> {
        let path = self.root.join(&record.file_path);
        let ciphertext = fs::read(&path).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;

        let recomputed = ciphertext_hash(&ciphertext);
        if recomputed != on_chain_ciphertext_hash || recomputed != record.ciphertext_hash {
            return Err(LedgerError::OffChainHashMismatch(block_number));
        }

        verify_signature(signer_public_key, recomputed.as_bytes(), &record.signature)
            .map_err(|_| LedgerError::OffChainSignatureInvalid(block_number))?;

        let aad_bytes = aad(block_number, signer_fingerprint);
        decrypt(block_key, &record.encryption_nonce, &ciphertext, &aad_bytes)
            .map_err(|_| LedgerError::OffChainTampered(block_number))
    }

    /// Delete a sidecar's underlying file. Used by rollback, which deletes
    /// the `OffChainRecord` file *last*, after the owning block is gone.
    pub fn delete_file(&self, record: &OffChainRecord) -> Result<(), LedgerError> {
        let path = self.root.join(&record.file_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LedgerError::OffChainUnavailable(e.to_string())),
        }
    }

    pub fn get_record(&self, id: &str) -> Result<Option<OffChainRecord>, LedgerError> {
        self.db.get_offchain_record(id)
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_crypto::KeyPair;

    fn open_store() -> (OffChainStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDb::open(dir.path().join("db")).unwrap());
        let store = OffChainStore::open(db, dir.path().join("offchain")).unwrap();
        (store, dir)
    }

    #[test]
    fn write_then_verify_round_trips() {
        let (store, _dir) = open_store();
        let kp = KeyPair::generate();
        let signer = LedgerSigner::from_secret_key_bytes(kp.secret_key_bytes().to_vec(), kp.public_key.0.clone());
        let key = ledger_crypto::generate_block_key();

        let (record, _ciphertext) = store
            .write(7, kp.fingerprint, &signer, &key, b"large payload bytes", 1_000)
            .unwrap();

        let plaintext = store
            .verify_and_decrypt(&record, 7, kp.fingerprint, &kp.public_key, record.ciphertext_hash, &key)
            .unwrap();
        assert_eq!(plaintext, b"large payload bytes");
    }

    #[test]
    fn hash_mismatch_detected() {
        let (store, _dir) = open_store();
        let kp = KeyPair::generate();
        let signer = LedgerSigner::from_secret_key_bytes(kp.secret_key_bytes().to_vec(), kp.public_key.0.clone());
        let key = ledger_crypto::generate_block_key();

        let (record, _ciphertext) = store
            .write(7, kp.fingerprint, &signer, &key, b"large payload bytes", 1_000)
            .unwrap();

        let wrong_hash = BlockHash::from_bytes([9u8; 32]);
        let result = store.verify_and_decrypt(&record, 7, kp.fingerprint, &kp.public_key, wrong_hash, &key);
        assert!(matches!(result, Err(LedgerError::OffChainHashMismatch(7))));
    }

    #[test]
    fn tampered_file_fails_decrypt() {
        let (store, _dir) = open_store();
        let kp = KeyPair::generate();
        let signer = LedgerSigner::from_secret_key_bytes(kp.secret_key_bytes().to_vec(), kp.public_key.0.clone());
        let key = ledger_crypto::generate_block_key();

        let (record, _ciphertext) = store
            .write(7, kp.fingerprint, &signer, &key, b"large payload bytes", 1_000)
            .unwrap();

        let path = store.root_path().join(&record.file_path);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let recomputed = ciphertext_hash(&bytes);
        let result = store.verify_and_decrypt(&record, 7, kp.fingerprint, &kp.public_key, recomputed, &key);
        assert!(result.is_err());
    }
}
