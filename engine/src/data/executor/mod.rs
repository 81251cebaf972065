//! SQL execution seam
//!
//! Backend strategies issue DDL and validation statements through [`SqlExecutor`];
//! each supported SQL backend provides one implementation, and
//! [`RecordingExecutor`] captures statements for dry runs and tests.

mod duckdb_spatial;
mod postgis;
mod recording;
mod spatialite;

use async_trait::async_trait;

pub use duckdb_spatial::DuckdbExecutor;
pub use postgis::PostgisExecutor;
pub use recording::RecordingExecutor;
pub use spatialite::SpatialiteExecutor;

use super::error::DataError;
use super::sql::SqlBackend;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Backend this executor talks to; selects the SQL dialect
    fn backend(&self) -> SqlBackend;

    /// Execute a single statement, discarding any result rows
    async fn execute(&self, sql: &str) -> Result<(), DataError>;

    /// Run a query and fetch at most one row; fails when the statement errors
    async fn validate(&self, sql: &str) -> Result<(), DataError>;

    /// Execute statements in order, stopping at the first failure
    async fn execute_all(&self, statements: &[String]) -> Result<(), DataError> {
        for sql in statements {
            tracing::trace!(backend = %self.backend(), sql = %sql, "Executing statement");
            self.execute(sql).await?;
        }
        Ok(())
    }
}
