//! Typed, prioritized filters and their per-dataset chains

mod chain;
mod parser;
mod types;

pub use chain::FilterChain;
pub use parser::{parse_chain, validate_chain};
pub use types::{CombineOp, Filter, FilterId, FilterKind, SpatialPredicate, parse_list};
