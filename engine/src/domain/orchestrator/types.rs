//! Orchestrator request and result types

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::dataset::{DatasetDescriptor, FeatureKey, ProviderKind};
use crate::domain::error::{EngineError, ErrorKind};
use crate::domain::geometry::BufferSpec;

/// What a run does with the compiled chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    /// Compile, materialize, apply and record history
    Filter,
    /// Step each target back to its previous state
    Unfilter,
    /// Clear subsets, drop artifacts and forget history
    Reset,
    /// Compile and materialize without touching subsets or history
    Export,
}

impl FilterAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterAction::Filter => "filter",
            FilterAction::Unfilter => "unfilter",
            FilterAction::Reset => "reset",
            FilterAction::Export => "export",
        }
    }

    /// Whether the action changes dataset subsets
    pub fn mutates(&self) -> bool {
        !matches!(self, FilterAction::Export)
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Selected source features; falls back to the exploring cache when unset
    pub source_keys: Option<Vec<FeatureKey>>,
    pub buffer: Option<BufferSpec>,
    /// Overrides the configured metric CRS
    pub metric_srid: Option<u32>,
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn with_source_keys(mut self, keys: Vec<FeatureKey>) -> Self {
        self.source_keys = Some(keys);
        self
    }

    pub fn with_buffer(mut self, buffer: BufferSpec) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_progress(mut self, progress: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Preparing,
    Compiling,
    Materializing,
    Applying,
    Done,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub dataset_id: String,
    pub stage: ProgressStage,
    /// Datasets finished so far
    pub completed: usize,
    pub total: usize,
}

/// Dataset the run changed or exported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedDataset {
    pub dataset_id: String,
    /// Provider tier that actually handled the dataset
    pub provider_kind: ProviderKind,
    /// Subset expression installed (or, for exports, produced)
    pub expression: String,
    /// History sequence recorded for the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDataset {
    pub dataset_id: String,
    pub kind: ErrorKind,
    pub reason: String,
}

impl SkippedDataset {
    pub fn from_error(dataset_id: &str, error: &EngineError) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

/// Outcome of one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub action: FilterAction,
    pub applied: Vec<AppliedDataset>,
    pub skipped: Vec<SkippedDataset>,
    pub warnings: Vec<String>,
    /// Materialized objects created by the run
    pub artifacts: Vec<String>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(action: FilterAction) -> Self {
        Self {
            action,
            applied: Vec::new(),
            skipped: Vec::new(),
            warnings: Vec::new(),
            artifacts: Vec::new(),
            cancelled: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && !self.cancelled
    }

    pub fn applied_ids(&self) -> Vec<&str> {
        self.applied.iter().map(|a| a.dataset_id.as_str()).collect()
    }

    pub(crate) fn skip(&mut self, dataset_id: &str, error: &EngineError) {
        tracing::warn!(dataset = %dataset_id, kind = %error.kind(), error = %error, "Dataset skipped");
        self.skipped.push(SkippedDataset::from_error(dataset_id, error));
    }

    /// Skip every target for a failure that applies to the whole run
    pub(crate) fn skip_all(&mut self, targets: &[DatasetDescriptor], error: &EngineError) {
        for target in targets {
            self.skip(&target.dataset_id, error);
        }
    }

    pub(crate) fn warn(&mut self, warning: String) {
        tracing::warn!("{}", warning);
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_records_skip_kind() {
        let mut summary = RunSummary::new(FilterAction::Filter);
        summary.skip("roads", &EngineError::materialization("roads", "disk full"));
        assert_eq!(summary.skipped[0].kind, ErrorKind::Materialization);
        assert!(summary.skipped[0].reason.contains("disk full"));
        assert!(!summary.is_success());
    }

    #[test]
    fn test_skip_all_marks_each_target() {
        let target = |id: &str| DatasetDescriptor {
            dataset_id: id.to_string(),
            provider_kind: ProviderKind::GenericReader,
            schema_name: String::new(),
            table_name: id.to_string(),
            geometry_field: "geom".to_string(),
            primary_key_field: "id".to_string(),
            primary_key_type: crate::domain::dataset::PrimaryKeyType::Integer,
            srid: 4326,
        };
        let mut summary = RunSummary::new(FilterAction::Filter);
        summary.skip_all(&[target("roads"), target("rivers")], &EngineError::invalid("bad chain"));
        assert_eq!(summary.skipped.len(), 2);
        assert!(summary.skipped.iter().all(|s| s.kind == ErrorKind::InvalidRequest));
        assert!(!summary.is_success());
    }

    #[test]
    fn test_warnings_deduplicated() {
        let mut summary = RunSummary::new(FilterAction::Filter);
        summary.warn("slow".into());
        summary.warn("slow".into());
        assert_eq!(summary.warnings.len(), 1);
    }

    #[test]
    fn test_cancelled_options() {
        let token = CancellationToken::new();
        let options = RunOptions::default().with_cancel(token.clone());
        assert!(!options.is_cancelled());
        token.cancel();
        assert!(options.is_cancelled());
    }

    #[test]
    fn test_action_serde() {
        let action: FilterAction = serde_json::from_str("\"unfilter\"").unwrap();
        assert_eq!(action, FilterAction::Unfilter);
        assert!(!FilterAction::Export.mutates());
    }
}
