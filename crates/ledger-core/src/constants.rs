//! ─── Ledger Engine Constants ─────────────────────────────────────────────
//!
//! Fixed wire-level commitments and hard ceilings that are never subject to
//! runtime configuration (contrast with `config.rs`, which holds the
//! process-wide *tunable* defaults).

/// Hash algorithm identifier recorded in export metadata.
pub const HASH_ALGORITHM: &str = "SHA3-256";

/// Signature algorithm identifier recorded in export metadata.
pub const SIGNATURE_ALGORITHM: &str = "DILITHIUM2-FIPS204";

/// AEAD algorithm identifier recorded in export metadata.
pub const AEAD_ALGORITHM: &str = "CHACHA20-POLY1305";

/// AEAD nonce length in bytes (96-bit nonce per §6).
pub const AEAD_NONCE_LEN: usize = 12;

/// AEAD authentication tag length in bytes (128-bit tag per §6).
pub const AEAD_TAG_LEN: usize = 16;

/// Absolute upper bound on off-chain payload size, independent of configuration.
pub const OFF_CHAIN_ABSOLUTE_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Hard ceiling on `max_results` for any search level, independent of configuration.
pub const SEARCH_MAX_RESULTS_CEILING: usize = 10_000;

/// Minimum query-term length, before the short-form exceptions in §4.6 apply.
pub const SEARCH_MIN_QUERY_LEN: usize = 4;

/// Chain length above which `ChainEngine::export` logs a size warning.
pub const EXPORT_WARN_BLOCK_COUNT: u64 = 100_000;

/// Maximum ROOT (depth 1) hierarchical key validity, in seconds.
pub const ROOT_KEY_MAX_VALIDITY_SECS: i64 = 5 * 365 * 24 * 3600;

/// Maximum INTERMEDIATE (depth 2) hierarchical key validity, in seconds.
pub const INTERMEDIATE_KEY_MAX_VALIDITY_SECS: i64 = 365 * 24 * 3600;

/// Maximum OPERATIONAL (depth >= 3) hierarchical key validity, in seconds.
pub const OPERATIONAL_KEY_MAX_VALIDITY_SECS: i64 = 90 * 24 * 3600;

/// Upper bound on samples returned by `RecoveryManager::diagnose`.
pub const RECOVERY_DIAGNOSIS_SAMPLE_CAP: usize = 100;

/// Bound on JSON recursion depth when scanning off-chain JSON payloads (level 3 search).
pub const DEFAULT_MAX_JSON_RECURSION: u32 = 100;

/// Bound on the number of 1000-block batches a single level-3 search query may scan.
pub const DEFAULT_MAX_JSON_ITERATIONS: u32 = 100;

/// Block count per batch used by `MAX_JSON_ITERATIONS`-bounded scans.
pub const JSON_SCAN_BATCH_SIZE: usize = 1000;

/// Number of hex-chunk tokens derived from an encrypted block's ciphertext
/// for `auto_keywords`, capped so a large sidecar doesn't balloon the index.
pub const CIPHERTEXT_TOKEN_CAP: usize = 16;
