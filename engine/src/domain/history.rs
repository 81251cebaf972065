//! Per-dataset undo/redo history
//!
//! Each dataset owns a linear stack of applied [`FilterState`]s and a cursor.
//! Pushing after an undo discards the forward branch. Callers serialize access
//! per dataset with the orchestrator's dataset lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::domain::dataset::ProviderKind;
use crate::domain::error::EngineError;
use crate::domain::session::{SessionRecord, SessionSnapshot, SessionStack};

/// Immutable snapshot of an applied filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterState {
    pub dataset_id: String,
    pub expression: String,
    pub timestamp: DateTime<Utc>,
    /// Monotonic across the manager
    pub sequence: u64,
    pub provider_kind: ProviderKind,
    #[serde(skip)]
    pub predecessor: Option<Arc<FilterState>>,
}

impl FilterState {
    pub fn predecessor_sequence(&self) -> Option<u64> {
        self.predecessor.as_ref().map(|p| p.sequence)
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            dataset_id: self.dataset_id.clone(),
            expression: self.expression.clone(),
            sequence: self.sequence,
            provider_kind: self.provider_kind,
        }
    }
}

#[derive(Debug, Default)]
struct DatasetHistory {
    states: Vec<Arc<FilterState>>,
    cursor: usize,
}

impl DatasetHistory {
    fn current(&self) -> Option<&Arc<FilterState>> {
        self.states.get(self.cursor)
    }

    /// Rebuild predecessor links after the oldest states were dropped
    fn relink(&mut self) {
        let mut previous: Option<Arc<FilterState>> = None;
        for state in self.states.iter_mut() {
            let relinked = Arc::new(FilterState {
                predecessor: previous.clone(),
                ..(**state).clone()
            });
            *state = Arc::clone(&relinked);
            previous = Some(relinked);
        }
    }
}

/// History entry with its position relative to the cursor
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub state: FilterState,
    pub current: bool,
}

pub struct HistoryManager {
    max_depth: Option<usize>,
    datasets: DashMap<String, DatasetHistory>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryManager")
            .field("max_depth", &self.max_depth)
            .field("datasets", &self.datasets.len())
            .finish()
    }
}

impl HistoryManager {
    /// `max_depth` of `None` keeps every state
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            max_depth: max_depth.map(|d| d.max(1)),
            datasets: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn has_history(&self, dataset_id: &str) -> bool {
        self.datasets
            .get(dataset_id)
            .is_some_and(|h| !h.states.is_empty())
    }

    /// Record the dataset's pre-filter subset as the root state.
    ///
    /// No-op when the dataset already has history.
    pub fn seed_baseline(
        &self,
        dataset_id: &str,
        expression: &str,
        provider_kind: ProviderKind,
    ) -> Option<Arc<FilterState>> {
        let mut history = self.datasets.entry(dataset_id.to_string()).or_default();
        if !history.states.is_empty() {
            return None;
        }
        let state = Arc::new(FilterState {
            dataset_id: dataset_id.to_string(),
            expression: expression.to_string(),
            timestamp: Utc::now(),
            sequence: self.next_sequence(),
            provider_kind,
            predecessor: None,
        });
        history.states.push(Arc::clone(&state));
        history.cursor = 0;
        tracing::debug!(dataset = %dataset_id, sequence = state.sequence, "History baseline seeded");
        Some(state)
    }

    /// Push a newly applied state, discarding any forward history
    pub fn push(
        &self,
        dataset_id: &str,
        expression: &str,
        provider_kind: ProviderKind,
    ) -> Arc<FilterState> {
        let mut history = self.datasets.entry(dataset_id.to_string()).or_default();
        let predecessor = history.current().cloned();
        if !history.states.is_empty() {
            let keep = history.cursor + 1;
            history.states.truncate(keep);
        }

        let state = Arc::new(FilterState {
            dataset_id: dataset_id.to_string(),
            expression: expression.to_string(),
            timestamp: Utc::now(),
            sequence: self.next_sequence(),
            provider_kind,
            predecessor,
        });
        history.states.push(Arc::clone(&state));

        if let Some(max) = self.max_depth
            && history.states.len() > max
        {
            let excess = history.states.len() - max;
            history.states.drain(..excess);
            history.relink();
        }
        history.cursor = history.states.len() - 1;

        history.current().cloned().unwrap_or(state)
    }

    pub fn current(&self, dataset_id: &str) -> Option<Arc<FilterState>> {
        self.datasets
            .get(dataset_id)
            .and_then(|h| h.current().cloned())
    }

    /// Move the cursor back; returns the state to re-apply
    pub fn undo(&self, dataset_id: &str) -> Result<Arc<FilterState>, EngineError> {
        let mut history = self
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| EngineError::no_undo(dataset_id))?;
        if history.states.is_empty() || history.cursor == 0 {
            return Err(EngineError::no_undo(dataset_id));
        }
        history.cursor -= 1;
        let cursor = history.cursor;
        Ok(Arc::clone(&history.states[cursor]))
    }

    /// Move the cursor forward; returns the state to re-apply
    pub fn redo(&self, dataset_id: &str) -> Result<Arc<FilterState>, EngineError> {
        let mut history = self
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| EngineError::no_redo(dataset_id))?;
        if history.cursor + 1 >= history.states.len() {
            return Err(EngineError::no_redo(dataset_id));
        }
        history.cursor += 1;
        let cursor = history.cursor;
        Ok(Arc::clone(&history.states[cursor]))
    }

    /// Forget a dataset's history
    pub fn clear(&self, dataset_id: &str) -> bool {
        self.datasets.remove(dataset_id).is_some()
    }

    /// States of a dataset, oldest first
    pub fn entries(&self, dataset_id: &str) -> Vec<HistoryEntry> {
        self.datasets
            .get(dataset_id)
            .map(|h| {
                h.states
                    .iter()
                    .enumerate()
                    .map(|(i, s)| HistoryEntry {
                        state: (**s).clone(),
                        current: i == h.cursor,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current state and full stack of every dataset, sorted by dataset id
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut records = Vec::new();
        let mut stacks = Vec::new();
        for entry in self.datasets.iter() {
            let Some(current) = entry.current() else {
                continue;
            };
            records.push(current.to_record());
            if entry.states.len() > 1 {
                stacks.push(SessionStack {
                    dataset_id: entry.key().clone(),
                    cursor: entry.cursor,
                    states: entry.states.iter().map(|s| s.to_record()).collect(),
                });
            }
        }
        records.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        stacks.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        SessionSnapshot {
            records,
            stacks,
            artifacts: Vec::new(),
        }
    }

    /// Rebuild histories from a persisted session; returns the dataset count.
    ///
    /// Datasets with a stored stack get it back with its cursor; the others
    /// get a root state from their record.
    pub fn restore(&self, snapshot: &SessionSnapshot) -> usize {
        let mut restored = 0;
        for stack in &snapshot.stacks {
            if stack.cursor >= stack.states.len() {
                tracing::warn!(dataset = %stack.dataset_id, "Ignoring session stack with invalid cursor");
                continue;
            }
            let mut history = DatasetHistory {
                states: stack.states.iter().map(|r| Arc::new(state_from_record(r))).collect(),
                cursor: stack.cursor,
            };
            if let Some(max) = self.max_depth
                && history.states.len() > max
            {
                let drop = (history.states.len() - max).min(history.cursor);
                history.states.drain(..drop);
                history.cursor -= drop;
            }
            history.relink();
            if let Some(top) = stack.states.iter().map(|r| r.sequence).max() {
                self.sequence.fetch_max(top, Ordering::SeqCst);
            }
            self.datasets.insert(stack.dataset_id.clone(), history);
            restored += 1;
        }

        for record in &snapshot.records {
            if self.datasets.contains_key(&record.dataset_id) {
                continue;
            }
            self.datasets.insert(
                record.dataset_id.clone(),
                DatasetHistory {
                    states: vec![Arc::new(state_from_record(record))],
                    cursor: 0,
                },
            );
            self.sequence.fetch_max(record.sequence, Ordering::SeqCst);
            restored += 1;
        }

        if restored > 0 {
            tracing::debug!(datasets = restored, "History restored from session");
        }
        restored
    }
}

fn state_from_record(record: &SessionRecord) -> FilterState {
    FilterState {
        dataset_id: record.dataset_id.clone(),
        expression: record.expression.clone(),
        timestamp: Utc::now(),
        sequence: record.sequence,
        provider_kind: record.provider_kind,
        predecessor: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND: ProviderKind = ProviderKind::FullSql;

    #[test]
    fn test_push_links_predecessor() {
        let history = HistoryManager::new(None);
        let first = history.push("roads", "a", KIND);
        let second = history.push("roads", "b", KIND);
        assert_eq!(second.predecessor_sequence(), Some(first.sequence));
        assert!(second.sequence > first.sequence);
        assert_eq!(history.current("roads").unwrap().expression, "b");
    }

    #[test]
    fn test_undo_then_redo_restores_expression() {
        let history = HistoryManager::new(None);
        history.push("roads", "a", KIND);
        history.push("roads", "b", KIND);
        let before = history.current("roads").unwrap().expression.clone();

        assert_eq!(history.undo("roads").unwrap().expression, "a");
        assert_eq!(history.redo("roads").unwrap().expression, before);
    }

    #[test]
    fn test_undo_at_root_and_redo_at_tip() {
        let history = HistoryManager::new(None);
        assert!(matches!(
            history.undo("roads"),
            Err(EngineError::NoHistory { direction: "undo", .. })
        ));
        history.push("roads", "a", KIND);
        assert!(history.undo("roads").is_err());
        assert!(matches!(
            history.redo("roads"),
            Err(EngineError::NoHistory { direction: "redo", .. })
        ));
    }

    #[test]
    fn test_push_after_undo_truncates_forward() {
        let history = HistoryManager::new(None);
        history.push("roads", "a", KIND);
        history.push("roads", "b", KIND);
        history.push("roads", "c", KIND);
        history.undo("roads").unwrap();
        history.undo("roads").unwrap();

        let d = history.push("roads", "d", KIND);
        assert_eq!(d.predecessor.as_ref().unwrap().expression, "a");
        assert!(history.redo("roads").is_err());
        let expressions: Vec<String> = history
            .entries("roads")
            .into_iter()
            .map(|e| e.state.expression)
            .collect();
        assert_eq!(expressions, vec!["a", "d"]);
    }

    #[test]
    fn test_bounded_depth_drops_oldest() {
        let history = HistoryManager::new(Some(2));
        history.push("roads", "a", KIND);
        history.push("roads", "b", KIND);
        history.push("roads", "c", KIND);

        let entries = history.entries("roads");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].state.expression, "b");
        assert!(entries[0].state.predecessor.is_none());
        assert!(entries[1].current);
        assert_eq!(history.undo("roads").unwrap().expression, "b");
        assert!(history.undo("roads").is_err());
    }

    #[test]
    fn test_baseline_seeded_once() {
        let history = HistoryManager::new(None);
        assert!(history.seed_baseline("roads", "", KIND).is_some());
        assert!(history.seed_baseline("roads", "x", KIND).is_none());
        let state = history.push("roads", "a", KIND);
        assert_eq!(state.predecessor.as_ref().unwrap().expression, "");
        assert_eq!(history.undo("roads").unwrap().expression, "");
    }

    #[test]
    fn test_datasets_independent() {
        let history = HistoryManager::new(None);
        history.push("roads", "a", KIND);
        history.push("rivers", "b", KIND);
        assert!(history.clear("roads"));
        assert!(!history.has_history("roads"));
        assert!(history.has_history("rivers"));
    }

    #[test]
    fn test_snapshot_restore_roots() {
        let history = HistoryManager::new(None);
        history.push("roads", "a", KIND);
        history.push("rivers", "b", ProviderKind::GenericReader);
        let snapshot = history.snapshot();
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[0].dataset_id, "rivers");
        assert!(snapshot.stacks.is_empty());

        let restored = HistoryManager::new(None);
        assert_eq!(restored.restore(&snapshot), 2);
        assert_eq!(restored.current("roads").unwrap().expression, "a");
        let next = restored.push("roads", "c", KIND);
        assert!(next.sequence > snapshot.records[1].sequence);
        assert!(restored.undo("roads").is_ok());
    }

    #[test]
    fn test_snapshot_restore_stack_keeps_cursor() {
        let history = HistoryManager::new(None);
        history.push("roads", "a", KIND);
        history.push("roads", "b", KIND);
        history.push("roads", "c", KIND);
        history.undo("roads").unwrap();

        let snapshot = history.snapshot();
        assert_eq!(snapshot.stacks.len(), 1);
        assert_eq!(snapshot.stacks[0].cursor, 1);

        let restored = HistoryManager::new(None);
        restored.restore(&snapshot);
        let current = restored.current("roads").unwrap();
        assert_eq!(current.expression, "b");
        assert_eq!(current.predecessor.as_ref().unwrap().expression, "a");
        assert_eq!(restored.redo("roads").unwrap().expression, "c");
        assert_eq!(restored.undo("roads").unwrap().expression, "b");
        assert_eq!(restored.undo("roads").unwrap().expression, "a");
    }

    #[test]
    fn test_restore_trims_to_depth() {
        let history = HistoryManager::new(None);
        for expr in ["a", "b", "c", "d"] {
            history.push("roads", expr, KIND);
        }
        let restored = HistoryManager::new(Some(2));
        restored.restore(&history.snapshot());
        let entries = restored.entries("roads");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].state.expression, "c");
        assert!(entries[1].current);
    }
}
