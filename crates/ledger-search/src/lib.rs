pub mod query;
pub mod search;

pub use query::{validate_max_results, validate_query_term, SearchLevel};
pub use search::{MatchSource, SearchEngine, SearchHit};
