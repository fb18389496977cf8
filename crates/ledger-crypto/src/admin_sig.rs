use serde::Serialize;

use ledger_core::{DilithiumPublicKey, DilithiumSignature};

use crate::dilithium::{self, SignatureError};

/// The message an admin signs to authorize a destructive operation
/// (rollback, forced key revocation). Binding the target and the `force`
/// flag into the signed bytes means a captured signature cannot be replayed
/// against a different target or reused to escalate a non-forced request
/// into a forced one.
#[derive(Serialize)]
struct AdminActionBody<'a> {
    action: &'a str,
    target: &'a [u8],
    force: bool,
    reason: &'a str,
}

fn canonical_bytes(action: &str, target: &[u8], force: bool, reason: &str) -> Vec<u8> {
    let body = AdminActionBody {
        action,
        target,
        force,
        reason,
    };
    bincode::serialize(&body).expect("admin action body serialization is infallible")
}

/// Sign an admin action (e.g. `"rollback"`, `"revoke_key"`) binding `target`,
/// `force`, and `reason` so the signature cannot be replayed elsewhere.
pub fn sign_admin_action(
    signer: &dilithium::LedgerSigner,
    action: &str,
    target: &[u8],
    force: bool,
    reason: &str,
) -> Result<DilithiumSignature, SignatureError> {
    signer.sign(&canonical_bytes(action, target, force, reason))
}

/// Verify an admin action signature produced by [`sign_admin_action`].
pub fn verify_admin_action(
    admin_public_key: &DilithiumPublicKey,
    action: &str,
    target: &[u8],
    force: bool,
    reason: &str,
    signature: &DilithiumSignature,
) -> Result<(), SignatureError> {
    dilithium::verify_signature(
        admin_public_key,
        &canonical_bytes(action, target, force, reason),
        signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn admin_signature_round_trips() {
        let kp = KeyPair::generate();
        let signer = dilithium::LedgerSigner::from_secret_key_bytes(
            kp.secret_key_bytes().to_vec(),
            kp.public_key.0.clone(),
        );
        let sig = sign_admin_action(&signer, "rollback", b"block-42", true, "fraud detected").unwrap();
        assert!(verify_admin_action(&kp.public_key, "rollback", b"block-42", true, "fraud detected", &sig).is_ok());
    }

    #[test]
    fn force_flag_is_bound_into_signature() {
        let kp = KeyPair::generate();
        let signer = dilithium::LedgerSigner::from_secret_key_bytes(
            kp.secret_key_bytes().to_vec(),
            kp.public_key.0.clone(),
        );
        let sig = sign_admin_action(&signer, "rollback", b"block-42", false, "routine").unwrap();
        assert!(verify_admin_action(&kp.public_key, "rollback", b"block-42", true, "routine", &sig).is_err());
    }
}
