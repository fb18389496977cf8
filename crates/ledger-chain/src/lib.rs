pub mod chain;
pub mod export;
pub mod import;

pub use chain::{AppendRequest, ChainEngine};
pub use export::{export_chain, export_chain_prefix, ExportHeader};
pub use import::import_chain;
