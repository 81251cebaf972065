//! Spatialite executor backed by an sqlx SQLite pool
//!
//! Every pooled connection loads `mod_spatialite`; spatial metadata tables
//! are initialized on first use of a fresh database file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::log::LevelFilter;

use super::SqlExecutor;
use crate::core::constants::SPATIALITE_EXTENSION;
use crate::data::error::DataError;
use crate::data::sql::SqlBackend;

const SPATIALITE_BUSY_TIMEOUT_SECS: u64 = 5;
const SPATIALITE_MAX_CONNECTIONS: u32 = 4;

/// Embedded Spatialite database
pub struct SpatialiteExecutor {
    pool: SqlitePool,
}

impl SpatialiteExecutor {
    /// Open (or create) a Spatialite database file
    pub async fn open(path: &Path) -> Result<Self, DataError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(SPATIALITE_BUSY_TIMEOUT_SECS))
            .extension(SPATIALITE_EXTENSION)
            .log_statements(LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .max_connections(SPATIALITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| DataError::backend_unavailable("spatialite", e.to_string()))?;

        let initialized: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'spatial_ref_sys'",
        )
        .fetch_one(&pool)
        .await
        .map_err(DataError::from_sqlite)?;

        if initialized == 0 {
            sqlx::query("SELECT InitSpatialMetaData(1)")
                .execute(&pool)
                .await
                .map_err(DataError::from_sqlite)?;
            tracing::debug!(path = %path.display(), "Spatial metadata initialized");
        }

        tracing::debug!(path = %path.display(), "Spatialite executor opened");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Spatialite pool closed");
    }
}

#[async_trait]
impl SqlExecutor for SpatialiteExecutor {
    fn backend(&self) -> SqlBackend {
        SqlBackend::Spatialite
    }

    async fn execute(&self, sql: &str) -> Result<(), DataError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(DataError::from_sqlite)?;
        Ok(())
    }

    async fn validate(&self, sql: &str) -> Result<(), DataError> {
        sqlx::query(sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::from_sqlite)?;
        Ok(())
    }
}
