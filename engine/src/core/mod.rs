//! Core application infrastructure

pub mod cli;
pub mod config;
pub mod constants;
pub mod request;
pub mod shutdown;
pub mod storage;

pub use crate::app::CoreApp;
pub use cli::{CliConfig, Commands};
pub use config::{AppConfig, CacheConfig, DatabaseConfig, EngineConfig, HistoryConfig};
pub use shutdown::ShutdownService;
pub use storage::AppStorage;
