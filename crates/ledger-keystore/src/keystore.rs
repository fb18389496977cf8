use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ledger_core::{AuthorizedKey, DilithiumPublicKey, DilithiumSignature, KeyFingerprint, LedgerError, Role, Timestamp};
use ledger_crypto::{key_fingerprint, verify_admin_action};
use ledger_store::LedgerDb;

use crate::dominance::dominates;

/// Persists and queries authorized keys; enforces role-based permissions.
///
/// The authorized-key cache is read-through: every lookup path reads from
/// `cache` first, and every write path (`register`, `revoke`, `delete`)
/// updates `db` then `cache` before returning, so a reader on another thread
/// never observes a write that the writer considers complete but the cache
/// does not yet reflect.
pub struct KeyStore {
    db: Arc<LedgerDb>,
    cache: RwLock<HashMap<KeyFingerprint, Vec<AuthorizedKey>>>,
}

impl KeyStore {
    pub fn open(db: Arc<LedgerDb>) -> Result<Self, LedgerError> {
        let mut cache: HashMap<KeyFingerprint, Vec<AuthorizedKey>> = HashMap::new();
        for record in db.iter_all_key_records()? {
            cache.entry(record.fingerprint).or_default().push(record);
        }
        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    fn insert_into_cache(&self, record: AuthorizedKey) {
        let mut cache = self.cache.write().expect("keystore cache poisoned");
        cache.entry(record.fingerprint).or_default().push(record);
    }

    fn records_for(&self, fingerprint: KeyFingerprint) -> Vec<AuthorizedKey> {
        self.cache
            .read()
            .expect("keystore cache poisoned")
            .get(&fingerprint)
            .cloned()
            .unwrap_or_default()
    }

    /// The record with the largest `created_at <= t`, i.e. the governing
    /// authorization at instant `t`.
    fn governing_record_at(&self, fingerprint: KeyFingerprint, t: Timestamp) -> Option<AuthorizedKey> {
        self.records_for(fingerprint)
            .into_iter()
            .filter(|r| r.created_at <= t)
            .max_by_key(|r| r.created_at)
    }

    pub fn was_authorized_at(&self, fingerprint: KeyFingerprint, t: Timestamp) -> bool {
        self.governing_record_at(fingerprint, t)
            .map(|r| r.was_active_at(t))
            .unwrap_or(false)
    }

    /// Current role of a key, if it is presently active. Used by callers
    /// that need to check dominance before issuing `register`/`revoke`.
    pub fn current_role(&self, fingerprint: KeyFingerprint, now: Timestamp) -> Option<Role> {
        self.governing_record_at(fingerprint, now)
            .filter(|r| r.was_active_at(now))
            .map(|r| r.role)
    }

    /// The raw public key for a fingerprint, from whichever historical
    /// record is most recent. Used wherever a caller holds only a
    /// fingerprint (e.g. `Block::signer_public_key`) but needs the raw key
    /// to verify a signature.
    pub fn public_key_for(&self, fingerprint: KeyFingerprint) -> Option<DilithiumPublicKey> {
        self.records_for(fingerprint)
            .into_iter()
            .max_by_key(|r| r.created_at)
            .map(|r| r.public_key)
    }

    /// Creates the single BOOTSTRAP_ADMIN record. Permitted only when the
    /// store has no records at all.
    /// Persist a previously-issued record verbatim, as when replaying the
    /// full authorization history during `ChainEngine::import`. Unlike
    /// `register`, performs no dominance or duplicate-activity checks —
    /// the caller (import) is replaying history that was already valid when
    /// it was first written, not issuing a new grant.
    pub fn import_record(&self, record: AuthorizedKey) -> Result<(), LedgerError> {
        self.db.put_key_record(&record)?;
        self.insert_into_cache(record);
        Ok(())
    }

    pub fn bootstrap(&self, public_key: DilithiumPublicKey, owner_name: String, now: Timestamp) -> Result<AuthorizedKey, LedgerError> {
        let has_any = !self.cache.read().expect("keystore cache poisoned").is_empty();
        if has_any {
            return Err(LedgerError::InvalidArgument(
                "bootstrap is only permitted on an empty key store".into(),
            ));
        }
        let fingerprint = key_fingerprint(&public_key.0);
        let record = AuthorizedKey {
            public_key,
            fingerprint,
            owner_name,
            role: Role::BootstrapAdmin,
            created_at: now,
            revoked_at: None,
            active: true,
        };
        self.db.put_key_record(&record)?;
        self.insert_into_cache(record.clone());
        Ok(record)
    }

    pub fn register(
        &self,
        caller_fingerprint: KeyFingerprint,
        target_public_key: DilithiumPublicKey,
        owner_name: String,
        target_role: Role,
        now: Timestamp,
    ) -> Result<AuthorizedKey, LedgerError> {
        let caller_role = self
            .current_role(caller_fingerprint, now)
            .ok_or_else(|| LedgerError::Unauthorized(caller_fingerprint.to_string()))?;

        if !dominates(caller_role, target_role) {
            return Err(LedgerError::InsufficientRole {
                need: format!("dominates {}", target_role.as_str()),
                have: caller_role.as_str().into(),
            });
        }

        let target_fingerprint = key_fingerprint(&target_public_key.0);
        if self
            .governing_record_at(target_fingerprint, now)
            .map(|r| r.was_active_at(now))
            .unwrap_or(false)
        {
            return Err(LedgerError::Duplicate(target_fingerprint.to_string()));
        }

        let record = AuthorizedKey {
            public_key: target_public_key,
            fingerprint: target_fingerprint,
            owner_name,
            role: target_role,
            created_at: now,
            revoked_at: None,
            active: true,
        };
        self.db.put_key_record(&record)?;
        self.insert_into_cache(record.clone());
        Ok(record)
    }

    pub fn revoke(
        &self,
        caller_fingerprint: KeyFingerprint,
        target_fingerprint: KeyFingerprint,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        let caller_role = self
            .current_role(caller_fingerprint, now)
            .ok_or_else(|| LedgerError::Unauthorized(caller_fingerprint.to_string()))?;

        let current = self
            .governing_record_at(target_fingerprint, now)
            .filter(|r| r.was_active_at(now))
            .ok_or_else(|| LedgerError::NotFound(target_fingerprint.to_string()))?;

        if !dominates(caller_role, current.role) {
            return Err(LedgerError::InsufficientRole {
                need: format!("dominates {}", current.role.as_str()),
                have: caller_role.as_str().into(),
            });
        }

        let mut revoked = current.clone();
        revoked.revoked_at = Some(now);
        revoked.active = false;
        self.db.put_key_record(&revoked)?;

        let mut cache = self.cache.write().expect("keystore cache poisoned");
        if let Some(records) = cache.get_mut(&target_fingerprint) {
            if let Some(slot) = records
                .iter_mut()
                .find(|r| r.created_at == current.created_at)
            {
                slot.revoked_at = Some(now);
                slot.active = false;
            }
        }
        Ok(())
    }

    /// Irreversibly deletes all records for `target_fingerprint`.
    ///
    /// `has_signed_blocks` is supplied by the caller (typically backed by
    /// `ChainEngine`) rather than owned here, since only the chain knows
    /// which signer fingerprints appear on persisted blocks.
    pub fn delete(
        &self,
        caller_fingerprint: KeyFingerprint,
        caller_public_key: &DilithiumPublicKey,
        target_fingerprint: KeyFingerprint,
        force: bool,
        reason: &str,
        admin_signature: Option<&DilithiumSignature>,
        has_signed_blocks: impl FnOnce() -> bool,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        let caller_role = self
            .current_role(caller_fingerprint, now)
            .ok_or_else(|| LedgerError::Unauthorized(caller_fingerprint.to_string()))?;

        if self.records_for(target_fingerprint).is_empty() {
            return Err(LedgerError::NotFound(target_fingerprint.to_string()));
        }

        if !force {
            if has_signed_blocks() {
                return Err(LedgerError::HasSignedBlocks(target_fingerprint.to_string()));
            }
        } else {
            if caller_role != Role::SuperAdmin {
                return Err(LedgerError::InsufficientRole {
                    need: Role::SuperAdmin.as_str().into(),
                    have: caller_role.as_str().into(),
                });
            }
            let sig = admin_signature.ok_or(LedgerError::InvalidAdminSignature)?;
            verify_admin_action(
                caller_public_key,
                "delete_key",
                target_fingerprint.as_bytes(),
                force,
                reason,
                sig,
            )
            .map_err(|_| LedgerError::InvalidAdminSignature)?;
        }

        self.db.delete_key_records_for(target_fingerprint)?;
        self.cache
            .write()
            .expect("keystore cache poisoned")
            .remove(&target_fingerprint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_crypto::KeyPair;

    fn open_store() -> (KeyStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDb::open(dir.path()).unwrap());
        (KeyStore::open(db).unwrap(), dir)
    }

    #[test]
    fn bootstrap_then_register_respects_dominance() {
        let (store, _dir) = open_store();
        let root = KeyPair::generate();
        let bootstrap = store.bootstrap(root.public_key.clone(), "root".into(), 100).unwrap();
        assert_eq!(bootstrap.role, Role::BootstrapAdmin);

        let user = KeyPair::generate();
        let registered = store
            .register(bootstrap.fingerprint, user.public_key.clone(), "alice".into(), Role::User, 200)
            .unwrap();
        assert!(store.was_authorized_at(registered.fingerprint, 200));
        assert!(!store.was_authorized_at(registered.fingerprint, 150));
    }

    #[test]
    fn second_bootstrap_rejected() {
        let (store, _dir) = open_store();
        let root = KeyPair::generate();
        store.bootstrap(root.public_key.clone(), "root".into(), 100).unwrap();
        let other = KeyPair::generate();
        assert!(store.bootstrap(other.public_key.clone(), "other".into(), 200).is_err());
    }

    #[test]
    fn revoke_then_was_authorized_at_reflects_window() {
        let (store, _dir) = open_store();
        let root = KeyPair::generate();
        let bootstrap = store.bootstrap(root.public_key.clone(), "root".into(), 100).unwrap();
        let user = KeyPair::generate();
        let registered = store
            .register(bootstrap.fingerprint, user.public_key.clone(), "alice".into(), Role::User, 200)
            .unwrap();
        store.revoke(bootstrap.fingerprint, registered.fingerprint, 300).unwrap();
        assert!(store.was_authorized_at(registered.fingerprint, 250));
        assert!(!store.was_authorized_at(registered.fingerprint, 350));
    }

    #[test]
    fn admin_cannot_register_super_admin() {
        let (store, _dir) = open_store();
        let root = KeyPair::generate();
        let bootstrap = store.bootstrap(root.public_key.clone(), "root".into(), 100).unwrap();
        let admin_kp = KeyPair::generate();
        let admin = store
            .register(bootstrap.fingerprint, admin_kp.public_key.clone(), "admin".into(), Role::Admin, 150)
            .unwrap();
        let target = KeyPair::generate();
        let result = store.register(admin.fingerprint, target.public_key.clone(), "x".into(), Role::SuperAdmin, 200);
        assert!(matches!(result, Err(LedgerError::InsufficientRole { .. })));
    }
}
