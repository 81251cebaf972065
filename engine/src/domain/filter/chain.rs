//! Ordered, prioritized filter collection for one dataset

use serde::{Deserialize, Serialize};

use super::types::{CombineOp, Filter, FilterId};
use crate::domain::error::EngineError;

/// Filters attached to exactly one dataset.
///
/// Filters combine in descending priority order, ties keep insertion order.
/// Filters are immutable once added except for their `enabled` flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterChain {
    pub dataset_id: String,
    #[serde(default)]
    filters: Vec<Filter>,
    #[serde(default)]
    next_id: u32,
}

impl FilterChain {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            filters: Vec::new(),
            next_id: 0,
        }
    }

    /// Add a filter, assigning it the next chain-local id
    pub fn add(&mut self, mut filter: Filter) -> FilterId {
        self.next_id += 1;
        let id = FilterId(self.next_id);
        filter.id = id;
        self.filters.push(filter);
        id
    }

    pub fn remove(&mut self, id: FilterId) -> Option<Filter> {
        let pos = self.filters.iter().position(|f| f.id == id)?;
        Some(self.filters.remove(pos))
    }

    /// Toggle a filter. Returns false when the id is unknown.
    pub fn set_enabled(&mut self, id: FilterId, enabled: bool) -> bool {
        match self.filters.iter_mut().find(|f| f.id == id) {
            Some(filter) => {
                filter.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: FilterId) -> Option<&Filter> {
        self.filters.iter().find(|f| f.id == id)
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Enabled filters in combination order
    pub fn ordered(&self) -> Vec<&Filter> {
        let mut enabled: Vec<&Filter> = self.filters.iter().filter(|f| f.enabled).collect();
        // sort_by is stable, so insertion order breaks ties
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority));
        enabled
    }

    pub fn has_spatial_filters(&self) -> bool {
        self.ordered().iter().any(|f| f.kind.is_spatial())
    }

    /// Rebuild id assignment after deserializing filters that carry no ids
    pub fn normalize_ids(&mut self) {
        let mut max = self.filters.iter().map(|f| f.id.0).max().unwrap_or(0);
        let mut seen = std::collections::HashSet::new();
        for filter in &mut self.filters {
            if filter.id.0 == 0 || !seen.insert(filter.id) {
                max += 1;
                filter.id = FilterId(max);
                seen.insert(filter.id);
            }
        }
        self.next_id = self.next_id.max(max);
    }

    /// Fold the enabled filters into one boolean expression.
    ///
    /// `compile_one` renders a single filter; disabled filters never reach it.
    /// The first entry renders as `(e)` (or `NOT (e)` for `AndNot`), each
    /// following entry as `acc OP (e)` with the accumulator parenthesized once
    /// it holds more than one entry. An empty chain yields an empty string.
    pub fn build_expression<F>(&self, mut compile_one: F) -> Result<String, EngineError>
    where
        F: FnMut(&Filter) -> Result<String, EngineError>,
    {
        let mut acc = String::new();
        let mut entries = 0usize;

        for filter in self.ordered() {
            let compiled = compile_one(filter)?;
            acc = match (entries, filter.combine) {
                (0, CombineOp::AndNot) => format!("NOT ({})", compiled),
                (0, _) => format!("({})", compiled),
                (1, op) => format!("{} {} ({})", acc, op.as_sql(), compiled),
                (_, op) => format!("({}) {} ({})", acc, op.as_sql(), compiled),
            };
            entries += 1;
        }

        Ok(acc)
    }

    /// Content hash of the chain, used in cache keys and artifact names
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.dataset_id.as_bytes());
        for filter in self.ordered() {
            hasher.update(&[0]);
            hasher.update(filter.kind.as_str().as_bytes());
            hasher.update(&[0]);
            hasher.update(filter.payload.as_bytes());
            hasher.update(&[0]);
            hasher.update(filter.combine.as_sql().as_bytes());
            hasher.update(&filter.priority.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough(f: &Filter) -> Result<String, EngineError> {
        Ok(f.payload.clone())
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let mut chain = FilterChain::new("roads");
        let a = chain.add(Filter::custom("a"));
        let b = chain.add(Filter::custom("b"));
        assert_eq!(a, FilterId(1));
        assert_eq!(b, FilterId(2));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_priority_order_with_stable_ties() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("low").with_priority(1));
        chain.add(Filter::custom("high_a").with_priority(5));
        chain.add(Filter::custom("high_b").with_priority(5));
        let order: Vec<&str> = chain.ordered().iter().map(|f| f.payload.as_str()).collect();
        assert_eq!(order, vec!["high_a", "high_b", "low"]);
    }

    #[test]
    fn test_build_expression_two_entries() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("a").with_priority(2));
        chain.add(Filter::custom("b").with_priority(1));
        assert_eq!(chain.build_expression(passthrough).unwrap(), "(a) AND (b)");
    }

    #[test]
    fn test_build_expression_nests_accumulator() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("a"));
        chain.add(Filter::custom("b").with_combine(CombineOp::Or));
        chain.add(Filter::custom("c").with_combine(CombineOp::AndNot));
        assert_eq!(
            chain.build_expression(passthrough).unwrap(),
            "((a) OR (b)) AND NOT (c)"
        );
    }

    #[test]
    fn test_leading_and_not_negates() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("a").with_combine(CombineOp::AndNot));
        assert_eq!(chain.build_expression(passthrough).unwrap(), "NOT (a)");
    }

    #[test]
    fn test_disabled_filter_never_compiled() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("kept"));
        let hidden = chain.add(Filter::custom("secret_payload"));
        chain.set_enabled(hidden, false);

        let mut compiled = Vec::new();
        let expr = chain
            .build_expression(|f| {
                compiled.push(f.id);
                Ok(f.payload.clone())
            })
            .unwrap();
        assert!(!expr.contains("secret_payload"));
        assert_eq!(compiled, vec![FilterId(1)]);
    }

    #[test]
    fn test_build_expression_deterministic() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("x").with_priority(3));
        chain.add(Filter::attribute("y").with_combine(CombineOp::Or));
        let first = chain.build_expression(passthrough).unwrap();
        let second = chain.build_expression(passthrough).unwrap();
        assert_eq!(first, second);
        assert_eq!(chain.fingerprint(), chain.fingerprint());
    }

    #[test]
    fn test_fingerprint_tracks_enabled_set() {
        let mut chain = FilterChain::new("roads");
        let id = chain.add(Filter::custom("x"));
        let before = chain.fingerprint();
        chain.set_enabled(id, false);
        assert_ne!(before, chain.fingerprint());
    }

    #[test]
    fn test_remove_and_unknown_ids() {
        let mut chain = FilterChain::new("roads");
        let id = chain.add(Filter::custom("x"));
        assert!(!chain.set_enabled(FilterId(99), false));
        assert!(chain.remove(id).is_some());
        assert!(chain.remove(id).is_none());
        assert_eq!(chain.build_expression(passthrough).unwrap(), "");
    }

    #[test]
    fn test_normalize_ids_after_deserialize() {
        let json = r#"{
            "dataset_id": "roads",
            "filters": [
                {"kind": "custom_expression", "payload": "a"},
                {"kind": "custom_expression", "payload": "b"}
            ]
        }"#;
        let mut chain: FilterChain = serde_json::from_str(json).unwrap();
        chain.normalize_ids();
        let ids: Vec<FilterId> = chain.filters().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![FilterId(1), FilterId(2)]);
        assert_eq!(chain.add(Filter::custom("c")), FilterId(3));
    }
}
