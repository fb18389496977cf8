//! Diagnosis and repair for a chain that has fallen out of compliance,
//! typically from a force-deleted key that still signs extant blocks.
//! The state machine itself lives in `ledger-chain`'s `ChainEngine` and
//! `ledger-validation`'s `ValidationEngine`; this crate sequences the three
//! repair strategies `ledger-chain` exposes the primitives for.

pub mod manager;
pub mod query;

pub use manager::{DiagnosisReport, RecoveryManager, RecoveryOutcome, RecoveryRequest, RollbackAdmin};
pub use query::RecoveryQuery;
