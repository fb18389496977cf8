use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use zeroize::{Zeroize, Zeroizing};

use ledger_core::{DilithiumPublicKey, DilithiumSignature, KeyFingerprint};

use crate::hash::key_fingerprint;

/// A generated or loaded Dilithium2 keypair with its derived fingerprint.
///
/// The secret key is held as a plain `Vec<u8>` and wiped on drop; callers
/// that need to hold it across awaits should wrap it in `Zeroizing`
/// themselves, as `sign` already does internally.
pub struct KeyPair {
    pub fingerprint: KeyFingerprint,
    pub public_key: DilithiumPublicKey,
    secret_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh Dilithium2 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        let pk_bytes = pk.as_bytes().to_vec();
        let fingerprint = key_fingerprint(&pk_bytes);
        Self {
            fingerprint,
            public_key: DilithiumPublicKey(pk_bytes),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    /// Restore a keypair from raw bytes, e.g. loaded from a key file.
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        let fingerprint = key_fingerprint(&pk_bytes);
        Self {
            fingerprint,
            public_key: DilithiumPublicKey(pk_bytes),
            secret_key: sk_bytes,
        }
    }

    /// Sign `message` using this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> DilithiumSignature {
        let sk = Zeroizing::new(self.secret_key.clone());
        crate::dilithium::sign(&sk, message).expect("sign with a freshly loaded secret key is infallible")
    }

    /// Read-only view of the secret key bytes, for callers that need to
    /// persist the key (e.g. to an encrypted key file).
    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ fingerprint: {:?} }}", self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_sign_verifies() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello");
        assert!(crate::dilithium::verify_signature(&kp.public_key, b"hello", &sig).is_ok());
    }

    #[test]
    fn fingerprint_is_deterministic_function_of_public_key() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_raw(kp.public_key.0.clone(), kp.secret_key_bytes().to_vec());
        assert_eq!(kp.fingerprint, restored.fingerprint);
    }
}
