pub mod coordinator;
pub mod extraction;

pub use coordinator::IndexingCoordinator;
pub use extraction::{build_index_entry, classify_category, extract_auto_keywords, extract_ciphertext_tokens};
