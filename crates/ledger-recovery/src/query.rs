use ledger_core::{BlockNumber, LedgerError};

use crate::manager::DiagnosisReport;

/// Read-only helpers over a `DiagnosisReport`, kept separate from
/// `RecoveryManager` so a caller that only wants to report status (an
/// operator dashboard, a health-check endpoint) doesn't need the engine
/// reference `RecoveryManager` borrows.
pub struct RecoveryQuery<'a> {
    diagnosis: &'a DiagnosisReport,
}

impl<'a> RecoveryQuery<'a> {
    pub fn new(diagnosis: &'a DiagnosisReport) -> Self {
        Self { diagnosis }
    }

    pub fn is_compliant(&self) -> bool {
        self.diagnosis.is_compliant()
    }

    /// Number of blocks that would survive a smart rollback right now, or
    /// `None` if the chain is already compliant (nothing to roll back) or
    /// the corruption starts at genesis (no valid prefix exists).
    pub fn valid_prefix_length(&self) -> Result<Option<BlockNumber>, LedgerError> {
        match self.diagnosis.earliest_corruption() {
            None => Ok(None),
            Some(0) => Err(LedgerError::InvalidArgument(
                "genesis itself is corrupted; there is no valid prefix".into(),
            )),
            Some(n) => Ok(Some(n)),
        }
    }

    /// A human-readable one-line summary, the kind an operator tool would
    /// print directly.
    pub fn describe(&self) -> String {
        if self.diagnosis.is_compliant() {
            return format!("chain is fully compliant ({} valid blocks)", self.diagnosis.valid_count);
        }
        let earliest = self.diagnosis.earliest_corruption().unwrap_or(0);
        format!(
            "chain has {} corrupted block(s) (sampled {}), earliest at block {} — {} valid blocks precede it",
            self.diagnosis.corrupted_count,
            self.diagnosis.sample.len(),
            earliest,
            self.diagnosis.valid_count,
        )
    }
}
