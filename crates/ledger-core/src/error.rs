use thiserror::Error;

/// The single error type crossing every crate boundary in this workspace,
/// mirroring the taxonomy the engine is specified against rather than the
/// storage or crypto backend that happens to raise it.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ── Authorization ─────────────────────────────────────────────────────
    #[error("key {0} is not authorized to act on this chain")]
    Unauthorized(String),

    #[error("role {have} insufficient for this operation, need at least {need}")]
    InsufficientRole { need: String, have: String },

    #[error("admin signature invalid for this operation")]
    InvalidAdminSignature,

    // ── Lookup ────────────────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("key {0} has already signed blocks and cannot be deleted, only revoked")]
    HasSignedBlocks(String),

    // ── Chain structure ───────────────────────────────────────────────────
    #[error("missing parent: block {0} does not chain to any known block")]
    MissingParent(u64),

    #[error("payload of {got} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { got: u64, max: u64 },

    #[error("rollback target {target} is before genesis")]
    RollbackPastGenesis { target: i64 },

    // ── Storage ───────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    StorageError(String),

    // ── Off-chain ─────────────────────────────────────────────────────────
    #[error("off-chain ciphertext hash mismatch for block {0}")]
    OffChainHashMismatch(u64),

    #[error("off-chain signature invalid for block {0}")]
    OffChainSignatureInvalid(u64),

    #[error("off-chain payload for block {0} failed authenticated decryption")]
    OffChainTampered(u64),

    #[error("off-chain store unavailable: {0}")]
    OffChainUnavailable(String),

    // ── Crypto ────────────────────────────────────────────────────────────
    #[error("authentication failed")]
    AuthenticationFailed,

    // ── Indexing / search ─────────────────────────────────────────────────
    #[error("indexing failed for block {0}: {1}")]
    IndexingFailed(u64, String),

    // ── General ───────────────────────────────────────────────────────────
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("concurrency retry budget exhausted after {0} attempts")]
    ConcurrencyRetryExhausted(u32),
}
