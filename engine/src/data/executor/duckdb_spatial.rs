//! DuckDB spatial executor
//!
//! Uses a single shared connection protected by a mutex; every statement
//! runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use duckdb::Connection;
use parking_lot::Mutex;

use super::SqlExecutor;
use crate::data::error::DataError;
use crate::data::sql::SqlBackend;
use crate::utils::sql::quote_literal;

pub struct DuckdbExecutor {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Drop for DuckdbExecutor {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.lock().take()
            && let Err((_, e)) = conn.close()
        {
            tracing::warn!("DuckDB connection close failed during drop: {}", e);
        }
    }
}

impl DuckdbExecutor {
    /// Open a database file (or an in-memory database when `path` is `None`)
    /// with the spatial extension loaded. `scratch_dir` receives DuckDB's
    /// spill files.
    pub async fn open(path: Option<&Path>, scratch_dir: Option<&Path>) -> Result<Self, DataError> {
        let path: Option<PathBuf> = path.map(Path::to_path_buf);
        let scratch: Option<PathBuf> = scratch_dir.map(Path::to_path_buf);

        let conn = tokio::task::spawn_blocking(move || {
            let conn = match &path {
                Some(p) => Connection::open(p)?,
                None => Connection::open_in_memory()?,
            };
            conn.execute_batch("INSTALL spatial; LOAD spatial;")?;
            if let Some(dir) = &scratch {
                conn.execute_batch(&format!(
                    "SET temp_directory = {};",
                    quote_literal(&dir.to_string_lossy())
                ))?;
            }
            Ok::<_, duckdb::Error>(conn)
        })
        .await
        .map_err(|e| DataError::task("duckdb", e.to_string()))??;

        tracing::debug!("DuckDB executor opened with spatial extension");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, duckdb::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            match guard.as_ref() {
                Some(conn) => f(conn).map_err(DataError::from),
                None => Err(DataError::backend_unavailable(
                    "duckdb",
                    "connection already closed",
                )),
            }
        })
        .await
        .map_err(|e| DataError::task("duckdb", e.to_string()))?
    }
}

#[async_trait]
impl SqlExecutor for DuckdbExecutor {
    fn backend(&self) -> SqlBackend {
        SqlBackend::Duckdb
    }

    async fn execute(&self, sql: &str) -> Result<(), DataError> {
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql)).await
    }

    async fn validate(&self, sql: &str) -> Result<(), DataError> {
        let sql = sql.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            rows.next()?;
            Ok(())
        })
        .await
    }
}
