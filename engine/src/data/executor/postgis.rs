//! PostGIS executor backed by an sqlx Postgres pool

use std::time::Duration;

use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::log::LevelFilter;

use super::SqlExecutor;
use crate::core::config::PostgresConfig;
use crate::core::constants::{
    DEFAULT_POSTGRES_ACQUIRE_TIMEOUT_SECS, DEFAULT_POSTGRES_MAX_CONNECTIONS,
};
use crate::data::error::DataError;
use crate::data::sql::SqlBackend;

/// Full SQL backend connection pool
pub struct PostgisExecutor {
    pool: PgPool,
}

impl PostgisExecutor {
    /// Connect and verify that the PostGIS extension answers
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DataError> {
        let url = config.url.as_deref().unwrap_or_default();
        if url.is_empty() {
            return Err(DataError::Config("PostgreSQL URL is required".into()));
        }

        let max_connections = if config.max_connections > 0 {
            config.max_connections
        } else {
            DEFAULT_POSTGRES_MAX_CONNECTIONS
        };
        let acquire_timeout = if config.acquire_timeout_secs > 0 {
            config.acquire_timeout_secs
        } else {
            DEFAULT_POSTGRES_ACQUIRE_TIMEOUT_SECS
        };

        let options: PgConnectOptions = url
            .parse()
            .map_err(|e| DataError::Config(format!("Invalid PostgreSQL URL: {}", e)))?;
        let options = options.log_statements(LevelFilter::Trace);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(acquire_timeout))
            .connect_with(options)
            .await
            .map_err(DataError::from_postgres)?;

        let executor = Self { pool };
        executor
            .validate("SELECT PostGIS_Version()")
            .await
            .map_err(|e| DataError::backend_unavailable("postgis", e.to_string()))?;

        tracing::debug!(max_connections, "PostGIS executor connected");
        Ok(executor)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostGIS pool closed");
    }
}

#[async_trait]
impl SqlExecutor for PostgisExecutor {
    fn backend(&self) -> SqlBackend {
        SqlBackend::Postgis
    }

    async fn execute(&self, sql: &str) -> Result<(), DataError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(DataError::from_postgres)?;
        Ok(())
    }

    async fn validate(&self, sql: &str) -> Result<(), DataError> {
        sqlx::query(sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::from_postgres)?;
        Ok(())
    }
}
