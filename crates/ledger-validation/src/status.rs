use ledger_core::BlockNumber;

/// Outcome for a single block after both validation passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Valid,
    InvalidHash,
    InvalidLink,
    InvalidSignature,
    UnauthorizedAtTimestamp,
    OffChainUnavailable,
    OffChainTampered,
}

impl BlockStatus {
    pub fn is_structurally_intact(&self) -> bool {
        !matches!(self, BlockStatus::InvalidHash | BlockStatus::InvalidLink | BlockStatus::InvalidSignature)
    }

    pub fn is_fully_compliant(&self) -> bool {
        matches!(self, BlockStatus::Valid)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockFinding {
    pub number: BlockNumber,
    pub status: BlockStatus,
}

/// Aggregate result of a full-chain validation run.
///
/// `structurally_intact` covers only the hash/link/signature/authorization
/// checks of pass 1: a chain can be structurally intact while still having
/// off-chain corruption. `fully_compliant` additionally requires every
/// off-chain reference to verify clean, so it implies `structurally_intact`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub total_blocks: u64,
    pub valid_count: u64,
    pub findings: Vec<BlockFinding>,
    pub structurally_intact: bool,
    pub fully_compliant: bool,
}

impl ValidationReport {
    pub fn corrupted_blocks(&self) -> impl Iterator<Item = &BlockFinding> {
        self.findings.iter().filter(|f| f.status != BlockStatus::Valid)
    }
}
