//! Engine error taxonomy
//!
//! Every failure the orchestrator can hit maps onto one of these variants.
//! Failures are caught per dataset and reported as skipped entries carrying
//! the variant's [`ErrorKind`] and display string.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::data::DataError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Source geometry could not be prepared for a provider group
    #[error("Geometry preparation failed: {0}")]
    GeometryPreparation(String),

    /// User expression failed the syntax check
    #[error("Expression syntax error: {0}")]
    ExpressionSyntax(String),

    /// Required dataset metadata (geometry field, primary key) is missing or invalid
    #[error("Dataset metadata error on {dataset}: {reason}")]
    DatasetMetadata { dataset: String, reason: String },

    /// Materialize or apply step failed; partial objects were cleaned up
    #[error("Materialization failed on {dataset}: {reason}")]
    Materialization { dataset: String, reason: String },

    /// Undo at the root or redo at the tip
    #[error("No {direction} history for {dataset}")]
    NoHistory {
        dataset: String,
        direction: &'static str,
    },

    /// Filter chain or request could not be used
    #[error("Invalid filter request: {0}")]
    InvalidRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Error category reported in run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    GeometryPreparation,
    ExpressionSyntax,
    DatasetMetadata,
    Materialization,
    NoHistory,
    InvalidRequest,
    Cancelled,
    Data,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::GeometryPreparation => "geometry_preparation",
            ErrorKind::ExpressionSyntax => "expression_syntax",
            ErrorKind::DatasetMetadata => "dataset_metadata",
            ErrorKind::Materialization => "materialization",
            ErrorKind::NoHistory => "no_history",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Data => "data",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GeometryPreparation(_) => ErrorKind::GeometryPreparation,
            Self::ExpressionSyntax(_) => ErrorKind::ExpressionSyntax,
            Self::DatasetMetadata { .. } => ErrorKind::DatasetMetadata,
            Self::Materialization { .. } => ErrorKind::Materialization,
            Self::NoHistory { .. } => ErrorKind::NoHistory,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Data(_) => ErrorKind::Data,
        }
    }

    pub fn geometry(reason: impl Into<String>) -> Self {
        Self::GeometryPreparation(reason.into())
    }

    pub fn syntax(reason: impl Into<String>) -> Self {
        Self::ExpressionSyntax(reason.into())
    }

    pub fn metadata(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DatasetMetadata {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }

    pub fn materialization(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Materialization {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }

    pub fn no_undo(dataset: impl Into<String>) -> Self {
        Self::NoHistory {
            dataset: dataset.into(),
            direction: "undo",
        }
    }

    pub fn no_redo(dataset: impl Into<String>) -> Self {
        Self::NoHistory {
            dataset: dataset.into(),
            direction: "redo",
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    /// Whether the SQL-tier failure may be retried once through a feature reader
    pub fn is_materialization(&self) -> bool {
        matches!(self, Self::Materialization { .. } | Self::Data(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(EngineError::geometry("x").kind(), ErrorKind::GeometryPreparation);
        assert_eq!(EngineError::syntax("x").kind(), ErrorKind::ExpressionSyntax);
        assert_eq!(EngineError::metadata("a", "b").kind(), ErrorKind::DatasetMetadata);
        assert_eq!(EngineError::no_undo("a").kind(), ErrorKind::NoHistory);
        assert_eq!(
            EngineError::from(DataError::Config("x".into())).kind(),
            ErrorKind::Data
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            EngineError::no_redo("roads").to_string(),
            "No redo history for roads"
        );
        assert_eq!(
            EngineError::syntax("unbalanced parentheses").to_string(),
            "Expression syntax error: unbalanced parentheses"
        );
        assert_eq!(
            EngineError::materialization("roads", "relation missing").to_string(),
            "Materialization failed on roads: relation missing"
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::DatasetMetadata).unwrap(),
            "\"dataset_metadata\""
        );
    }
}
