pub mod admin_sig;
pub mod aead;
pub mod dilithium;
pub mod hash;
pub mod keypair;

pub use admin_sig::{sign_admin_action, verify_admin_action};
pub use aead::{decrypt, derive_block_key, encrypt, generate_block_key, generate_nonce, AeadError};
pub use dilithium::{verify_signature, LedgerSigner, SignatureError};
pub use hash::{block_hash, ciphertext_hash, key_fingerprint, sha3_256};
pub use keypair::KeyPair;
