//! Spatial filtering domain
//!
//! - `dataset` - Dataset descriptors, provider tiers and feature keys
//! - `filter` - Typed, prioritized filter chains
//! - `geometry` - Source geometry preparation, buffers and CRS handling
//! - `compiler` - Chain compilation into backend boolean expressions
//! - `backend` - Per-tier materialize/apply/cleanup strategies
//! - `history` - Per-dataset undo/redo of filter states
//! - `session` - Persistence of current filter states
//! - `orchestrator` - End-to-end runs over many datasets

pub mod backend;
pub mod compiler;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod history;
pub mod orchestrator;
pub mod session;

pub use dataset::{DatasetDescriptor, FeatureKey, PrimaryKeyType, ProviderKind};
pub use error::{EngineError, ErrorKind};
pub use filter::{Filter, FilterChain};
pub use history::{FilterState, HistoryManager};
pub use orchestrator::{
    EngineContext, FilterAction, FilterOrchestrator, RunOptions, RunSummary,
};
pub use session::{SessionArtifact, SessionRecord, SessionSnapshot, SessionStack, SessionStore};
