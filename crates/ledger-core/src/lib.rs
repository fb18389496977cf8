pub mod block;
pub mod config;
pub mod constants;
pub mod error;
pub mod index_entry;
pub mod keyrecord;
pub mod offchain_record;
pub mod types;

pub use block::{Block, BlockBody, Category, OffChainRef};
pub use config::Config;
pub use constants::*;
pub use error::LedgerError;
pub use index_entry::{IndexEntry, SizeBucket};
pub use keyrecord::{AuthorizedKey, HierarchicalKey, Role};
pub use offchain_record::OffChainRecord;
pub use types::{BlockHash, BlockNumber, DilithiumPublicKey, DilithiumSignature, KeyFingerprint, Timestamp};
