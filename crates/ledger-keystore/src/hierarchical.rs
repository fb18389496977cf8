use std::sync::Arc;

use ledger_core::{
    HierarchicalKey, KeyFingerprint, LedgerError, Role, Timestamp, INTERMEDIATE_KEY_MAX_VALIDITY_SECS,
    OPERATIONAL_KEY_MAX_VALIDITY_SECS, ROOT_KEY_MAX_VALIDITY_SECS,
};
use ledger_store::LedgerDb;

use crate::dominance::dominates_depth;

/// The three-tier hierarchical key graph (ROOT / INTERMEDIATE / OPERATIONAL).
/// Distinct from `KeyStore`'s flat authorized-key records: this tracks
/// delegation structure, not signing authority over blocks.
pub struct HierarchicalKeyStore {
    db: Arc<LedgerDb>,
}

fn max_validity_secs(depth: u8) -> i64 {
    match depth {
        1 => ROOT_KEY_MAX_VALIDITY_SECS,
        2 => INTERMEDIATE_KEY_MAX_VALIDITY_SECS,
        _ => OPERATIONAL_KEY_MAX_VALIDITY_SECS,
    }
}

impl HierarchicalKeyStore {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// Create or rotate a hierarchical key. Rotation is simply creating a
    /// new record with the same `id`; historical state lives only in the
    /// revoked flag of the previous record, which the caller must revoke
    /// separately via `revoke` before rotating if it wants a clean handoff.
    pub fn create(
        &self,
        caller_role: Role,
        id: String,
        fingerprint: KeyFingerprint,
        depth: u8,
        parent_id: Option<String>,
        purpose: String,
        now: Timestamp,
        requested_validity_secs: Option<i64>,
    ) -> Result<HierarchicalKey, LedgerError> {
        if !dominates_depth(caller_role, depth) {
            return Err(LedgerError::InsufficientRole {
                need: format!("sufficient role to mint depth {depth} keys"),
                have: caller_role.as_str().into(),
            });
        }

        if depth > 1 {
            let parent_id = parent_id
                .clone()
                .ok_or_else(|| LedgerError::MissingParent(0))?;
            let parent = self
                .db
                .get_hierarchical_key(&parent_id)?
                .ok_or_else(|| LedgerError::MissingParent(0))?;
            if parent.is_revoked() || parent.depth != depth - 1 {
                return Err(LedgerError::MissingParent(0));
            }
        } else if parent_id.is_some() {
            return Err(LedgerError::InvalidArgument("a ROOT key cannot have a parent".into()));
        }

        let ceiling = max_validity_secs(depth);
        let validity_secs = requested_validity_secs.unwrap_or(ceiling).min(ceiling);
        let key = HierarchicalKey {
            id,
            fingerprint,
            depth,
            parent_id,
            validity_until: now + validity_secs,
            purpose,
            revoked_at: None,
        };
        self.db.put_hierarchical_key(&key)?;
        Ok(key)
    }

    pub fn revoke(&self, caller_role: Role, id: &str, now: Timestamp) -> Result<(), LedgerError> {
        let mut key = self
            .db
            .get_hierarchical_key(id)?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        if !dominates_depth(caller_role, key.depth) {
            return Err(LedgerError::InsufficientRole {
                need: format!("sufficient role to revoke depth {} keys", key.depth),
                have: caller_role.as_str().into(),
            });
        }
        key.revoked_at = Some(now);
        self.db.put_hierarchical_key(&key)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<HierarchicalKey>, LedgerError> {
        self.db.get_hierarchical_key(id)
    }

    pub fn children_of(&self, parent_id: &str) -> Result<Vec<HierarchicalKey>, LedgerError> {
        self.db.iter_hierarchical_keys_by_parent(parent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (HierarchicalKeyStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDb::open(dir.path()).unwrap());
        (HierarchicalKeyStore::new(db), dir)
    }

    #[test]
    fn root_requires_super_admin() {
        let (hks, _dir) = store();
        let result = hks.create(Role::Admin, "root-1".into(), KeyFingerprint([1; 32]), 1, None, "root".into(), 0, None);
        assert!(matches!(result, Err(LedgerError::InsufficientRole { .. })));
        let ok = hks.create(Role::SuperAdmin, "root-1".into(), KeyFingerprint([1; 32]), 1, None, "root".into(), 0, None);
        assert!(ok.is_ok());
    }

    #[test]
    fn intermediate_without_parent_fails() {
        let (hks, _dir) = store();
        let result = hks.create(Role::Admin, "int-1".into(), KeyFingerprint([2; 32]), 2, Some("nonexistent".into()), "p".into(), 0, None);
        assert!(matches!(result, Err(LedgerError::MissingParent(_))));
    }

    #[test]
    fn intermediate_with_valid_parent_succeeds() {
        let (hks, _dir) = store();
        hks.create(Role::SuperAdmin, "root-1".into(), KeyFingerprint([1; 32]), 1, None, "root".into(), 0, None).unwrap();
        let child = hks.create(Role::Admin, "int-1".into(), KeyFingerprint([2; 32]), 2, Some("root-1".into()), "p".into(), 0, None);
        assert!(child.is_ok());
    }

    #[test]
    fn validity_is_capped_at_tier_ceiling() {
        let (hks, _dir) = store();
        let key = hks
            .create(Role::SuperAdmin, "root-1".into(), KeyFingerprint([1; 32]), 1, None, "root".into(), 0, Some(i64::MAX / 2))
            .unwrap();
        assert_eq!(key.validity_until, ROOT_KEY_MAX_VALIDITY_SECS);
    }
}
