//! Statement-recording executor for dry runs and tests

use async_trait::async_trait;
use parking_lot::Mutex;

use super::SqlExecutor;
use crate::data::error::DataError;
use crate::data::sql::SqlBackend;

/// Records every statement instead of running it.
///
/// Statements containing one of the configured failure patterns are
/// recorded and then rejected, which lets callers exercise cleanup paths.
pub struct RecordingExecutor {
    backend: SqlBackend,
    statements: Mutex<Vec<String>>,
    fail_patterns: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new(backend: SqlBackend) -> Self {
        Self {
            backend,
            statements: Mutex::new(Vec::new()),
            fail_patterns: Mutex::new(Vec::new()),
        }
    }

    /// Reject statements containing `pattern`
    pub fn fail_on(self, pattern: impl Into<String>) -> Self {
        self.fail_patterns.lock().push(pattern.into());
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn clear(&self) {
        self.statements.lock().clear();
    }

    fn record(&self, sql: &str) -> Result<(), DataError> {
        self.statements.lock().push(sql.to_string());
        let rejected = self
            .fail_patterns
            .lock()
            .iter()
            .any(|p| sql.contains(p.as_str()));
        if rejected {
            return Err(DataError::backend_unavailable(
                self.backend.name(),
                format!("statement rejected: {}", sql),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    fn backend(&self) -> SqlBackend {
        self.backend
    }

    async fn execute(&self, sql: &str) -> Result<(), DataError> {
        self.record(sql)
    }

    async fn validate(&self, sql: &str) -> Result<(), DataError> {
        self.record(sql)
    }
}
