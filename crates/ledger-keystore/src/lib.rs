pub mod dominance;
pub mod hierarchical;
pub mod keystore;

pub use dominance::{dominates, dominates_depth};
pub use hierarchical::HierarchicalKeyStore;
pub use keystore::KeyStore;
