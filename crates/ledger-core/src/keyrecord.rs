//! Authorization data model: flat authorized-key records and the three-tier
//! hierarchical key graph. The policy that interprets these (role dominance,
//! temporal activation) lives in `ledger-keystore`; this module only defines
//! the shapes and the invariants that follow directly from the shape.

use serde::{Deserialize, Serialize};

use crate::types::{DilithiumPublicKey, KeyFingerprint, Timestamp};

/// A principal's level of trust. Ordered loosely for display purposes only —
/// `ledger-keystore` implements the real dominance matrix explicitly, since
/// dominance here is not a total order (e.g. `User` may mint `depth >= 3`
/// operational keys but cannot register a `ReadOnly` account in someone
/// else's namespace; that nuance does not survive a bare `Ord` derive).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    ReadOnly,
    BootstrapAdmin,
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::ReadOnly => "READ_ONLY",
            Role::BootstrapAdmin => "BOOTSTRAP_ADMIN",
        }
    }
}

/// One historical record of a public key's authorization. Authorization at
/// any instant `t` is determined by the most recent record whose
/// `created_at <= t`; records are never deleted on revocation, only marked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizedKey {
    pub public_key: DilithiumPublicKey,
    pub fingerprint: KeyFingerprint,
    pub owner_name: String,
    pub role: Role,
    pub created_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
    pub active: bool,
}

impl AuthorizedKey {
    /// Whether this specific record was the governing authorization at `t`.
    /// Does not check whether this is the *most recent* applicable record —
    /// callers (KeyStore) select that record first, then ask this question.
    pub fn was_active_at(&self, t: Timestamp) -> bool {
        self.created_at <= t && self.revoked_at.map(|r| r > t).unwrap_or(true)
    }
}

/// A node in the three-tier hierarchical key graph (ROOT / INTERMEDIATE /
/// OPERATIONAL, `depth` 1 / 2 / 3+ respectively).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HierarchicalKey {
    pub id: String,
    pub fingerprint: KeyFingerprint,
    pub depth: u8,
    pub parent_id: Option<String>,
    pub validity_until: Timestamp,
    pub purpose: String,
    pub revoked_at: Option<Timestamp>,
}

impl HierarchicalKey {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_valid_at(&self, t: Timestamp) -> bool {
        !self.is_revoked() && t <= self.validity_until
    }

    pub fn tier_name(&self) -> &'static str {
        match self.depth {
            1 => "ROOT",
            2 => "INTERMEDIATE",
            _ => "OPERATIONAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_at(created: Timestamp, revoked: Option<Timestamp>) -> AuthorizedKey {
        AuthorizedKey {
            public_key: DilithiumPublicKey(vec![1, 2, 3]),
            fingerprint: KeyFingerprint([0u8; 32]),
            owner_name: "alice".into(),
            role: Role::User,
            created_at: created,
            revoked_at: revoked,
            active: revoked.is_none(),
        }
    }

    #[test]
    fn was_active_at_respects_window() {
        let k = key_at(100, Some(200));
        assert!(!k.was_active_at(50));
        assert!(k.was_active_at(100));
        assert!(k.was_active_at(199));
        assert!(!k.was_active_at(200));
    }

    #[test]
    fn never_revoked_stays_active_forever() {
        let k = key_at(100, None);
        assert!(k.was_active_at(i64::MAX));
    }

    #[test]
    fn hierarchical_tier_names() {
        let mut hk = HierarchicalKey {
            id: "a".into(),
            fingerprint: KeyFingerprint([1u8; 32]),
            depth: 1,
            parent_id: None,
            validity_until: 1000,
            purpose: "root".into(),
            revoked_at: None,
        };
        assert_eq!(hk.tier_name(), "ROOT");
        hk.depth = 2;
        assert_eq!(hk.tier_name(), "INTERMEDIATE");
        hk.depth = 5;
        assert_eq!(hk.tier_name(), "OPERATIONAL");
    }
}
