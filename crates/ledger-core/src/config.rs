//! Process-wide tunable configuration.
//!
//! This is a global singleton by design of the system being modeled, not a
//! convenience: every engine in the workspace reads `config::get()` rather
//! than holding its own copy, which means changing configuration at runtime
//! changes behavior for every chain handle in the process, including ones
//! already in flight. Callers that need isolation between chains must run
//! them in separate processes.

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// Tunable limits and thresholds. See `constants.rs` for the values this
/// crate treats as fixed instead.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Maximum `data` length, in UTF-8 characters, kept on-chain before the
    /// off-chain threshold even applies.
    pub max_on_chain_chars: usize,
    /// Maximum `data` length, in bytes, kept on-chain.
    pub max_on_chain_bytes: u64,
    /// Payload size at or above which a block's data moves to off-chain storage.
    pub off_chain_threshold_bytes: u64,
    /// Maximum size of any single off-chain payload, plaintext.
    pub off_chain_max_bytes: u64,
    /// Default and ceiling for `SearchEngine` result counts.
    pub max_search_results: usize,
    /// Recursion bound when scanning off-chain JSON payloads during level-3 search.
    pub max_json_recursion: u32,
    /// Iteration bound (in `JSON_SCAN_BATCH_SIZE`-block batches) for level-3 search.
    pub max_json_iterations: u32,
    /// Blocks per `ChainEngine::batch_append` call before it is split internally.
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_on_chain_chars: 10_000,
            max_on_chain_bytes: 1_048_576,
            off_chain_threshold_bytes: 524_288,
            off_chain_max_bytes: 104_857_600,
            max_search_results: 10_000,
            max_json_recursion: 100,
            max_json_iterations: 100,
            batch_size: 50,
        }
    }
}

static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

/// Current configuration snapshot.
pub fn get() -> Config {
    CONFIG.read().expect("config lock poisoned").clone()
}

/// Replace the process-wide configuration wholesale.
pub fn set(cfg: Config) {
    *CONFIG.write().expect("config lock poisoned") = cfg;
}

/// Restore defaults. Primarily useful between test cases that mutate config.
pub fn reset_to_defaults() {
    set(Config::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_set() {
        reset_to_defaults();
        let mut cfg = get();
        cfg.max_search_results = 42;
        set(cfg);
        assert_eq!(get().max_search_results, 42);
        reset_to_defaults();
        assert_eq!(get().max_search_results, 10_000);
    }
}
