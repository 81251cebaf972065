//! Unified error type for data layer
//!
//! Wraps errors from every storage backend the engine talks to (PostGIS,
//! Spatialite, DuckDB spatial and feature files) while keeping track of
//! which backend produced them.

use thiserror::Error;

/// Unified error type for data layer operations
#[derive(Error, Debug)]
pub enum DataError {
    /// PostgreSQL / PostGIS error (full SQL backend)
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// SQLite / Spatialite error (embedded backend)
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// DuckDB error (embedded backend)
    #[error("DuckDB error: {0}")]
    Duckdb(#[from] duckdb::Error),

    /// Feature reader failure (file-based datasets)
    #[error("Reader error on {dataset}: {reason}")]
    Reader { dataset: String, reason: String },

    /// Subset could not be applied to a dataset handle
    #[error("Subset rejected by {dataset}: {reason}")]
    SubsetRejected { dataset: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking task panicked or was cancelled
    #[error("Background task failed on {backend}: {reason}")]
    Task {
        backend: &'static str,
        reason: String,
    },

    /// Backend not available
    #[error("Backend {backend} is not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// Dataset not registered with the connector
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),
}

impl DataError {
    pub fn from_postgres(e: sqlx::Error) -> Self {
        Self::Postgres(e)
    }

    pub fn from_sqlite(e: sqlx::Error) -> Self {
        Self::Sqlite(e)
    }

    pub fn reader(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reader {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }

    pub fn subset_rejected(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubsetRejected {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }

    pub fn task(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Task {
            backend,
            reason: reason.into(),
        }
    }

    pub fn backend_unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Check if this is a connection-related error that might be transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(e) | Self::Postgres(e) => {
                matches!(
                    e,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                )
            }
            Self::BackendUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Get the backend name that generated this error
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgis",
            Self::Sqlite(_) => "spatialite",
            Self::Duckdb(_) => "duckdb",
            Self::Reader { .. } => "reader",
            Self::Task { backend, .. } => backend,
            Self::BackendUnavailable { backend, .. } => backend,
            Self::SubsetRejected { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::UnknownDataset(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_error_display() {
        let err = DataError::reader("parcels", "line 3: invalid WKT");
        assert_eq!(err.to_string(), "Reader error on parcels: line 3: invalid WKT");
    }

    #[test]
    fn test_backend_unavailable_error_display() {
        let err = DataError::backend_unavailable("postgis", "connection refused");
        assert_eq!(
            err.to_string(),
            "Backend postgis is not available: connection refused"
        );
    }

    #[test]
    fn test_backend_method() {
        assert_eq!(DataError::task("duckdb", "join").backend(), "duckdb");
        assert_eq!(
            DataError::from_postgres(sqlx::Error::PoolTimedOut).backend(),
            "postgis"
        );
        assert_eq!(DataError::Config("x".into()).backend(), "unknown");
    }

    #[test]
    fn test_is_transient() {
        assert!(DataError::from_sqlite(sqlx::Error::PoolClosed).is_transient());
        assert!(DataError::backend_unavailable("postgis", "down").is_transient());
        assert!(!DataError::Config("bad config".into()).is_transient());
        assert!(!DataError::reader("a", "b").is_transient());
    }
}
