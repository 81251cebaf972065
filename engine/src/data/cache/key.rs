//! Typed cache keys
//!
//! Every key knows the dataset that owns it so that a dataset's entries can
//! be dropped together when its data changes. Rendered keys carry a version
//! prefix so a format change never reads stale entries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::dataset::ProviderKind;

const CACHE_KEY_VERSION: &str = "v1";

/// Key usable by a [`CacheStore`](super::CacheStore)
pub trait StoreKey: Send + Sync {
    /// Dataset that owns the entry
    fn dataset_id(&self) -> &str;

    /// Rendered map key
    fn render(&self) -> String;
}

/// Exploration state distinguished by the exploring-result cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    SingleFeature,
    MultipleFeatures,
    CustomExpression,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::SingleFeature => "single",
            SelectionMode::MultipleFeatures => "multiple",
            SelectionMode::CustomExpression => "custom",
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `(dataset_id, selection_mode)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExploringKey {
    pub dataset_id: String,
    pub mode: SelectionMode,
}

impl ExploringKey {
    pub fn new(dataset_id: impl Into<String>, mode: SelectionMode) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            mode,
        }
    }
}

impl StoreKey for ExploringKey {
    fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    fn render(&self) -> String {
        format!(
            "{}:explore:{}:{}",
            CACHE_KEY_VERSION,
            self.dataset_id,
            self.mode.as_str()
        )
    }
}

/// Hash of chain contents, target dataset, provider kind and geometry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpressionKey {
    pub dataset_id: String,
    hash: String,
}

impl ExpressionKey {
    pub fn new(
        dataset_id: &str,
        chain_fingerprint: &str,
        provider_kind: ProviderKind,
        geometry_fingerprint: Option<&str>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(chain_fingerprint.as_bytes());
        hasher.update(&[0]);
        hasher.update(dataset_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(provider_kind.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(geometry_fingerprint.unwrap_or("-").as_bytes());
        Self {
            dataset_id: dataset_id.to_string(),
            hash: hasher.finalize().to_hex().to_string(),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl StoreKey for ExpressionKey {
    fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    fn render(&self) -> String {
        format!("{}:expr:{}:{}", CACHE_KEY_VERSION, self.dataset_id, self.hash)
    }
}

/// `(source dataset, buffer spec, preparation target, selection fingerprint)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeometryKey {
    pub dataset_id: String,
    pub buffer: String,
    /// Provider kind plus dialect, e.g. `full_sql/postgis`
    pub target: String,
    pub selection: String,
}

impl GeometryKey {
    pub fn new(
        dataset_id: impl Into<String>,
        buffer: impl Into<String>,
        target: impl Into<String>,
        selection: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            buffer: buffer.into(),
            target: target.into(),
            selection: selection.into(),
        }
    }
}

impl StoreKey for GeometryKey {
    fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    fn render(&self) -> String {
        format!(
            "{}:geom:{}:{}:{}:{}",
            CACHE_KEY_VERSION, self.dataset_id, self.buffer, self.target, self.selection
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exploring_key_format() {
        let key = ExploringKey::new("roads", SelectionMode::MultipleFeatures);
        assert_eq!(key.render(), "v1:explore:roads:multiple");
        assert_eq!(key.dataset_id(), "roads");
    }

    #[test]
    fn test_exploring_modes_distinct() {
        let single = ExploringKey::new("roads", SelectionMode::SingleFeature).render();
        let custom = ExploringKey::new("roads", SelectionMode::CustomExpression).render();
        assert_ne!(single, custom);
    }

    #[test]
    fn test_expression_key_depends_on_geometry() {
        let a = ExpressionKey::new("roads", "abc", ProviderKind::FullSql, Some("g1"));
        let b = ExpressionKey::new("roads", "abc", ProviderKind::FullSql, Some("g2"));
        let c = ExpressionKey::new("roads", "abc", ProviderKind::FullSql, Some("g1"));
        assert_ne!(a.render(), b.render());
        assert_eq!(a.render(), c.render());
    }

    #[test]
    fn test_expression_key_depends_on_kind() {
        let a = ExpressionKey::new("roads", "abc", ProviderKind::FullSql, None);
        let b = ExpressionKey::new("roads", "abc", ProviderKind::EmbeddedSql, None);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_geometry_key_format() {
        let key = GeometryKey::new("parcels", "fixed:50", "generic_reader", "deadbeef");
        assert_eq!(
            key.render(),
            "v1:geom:parcels:fixed:50:generic_reader:deadbeef"
        );
    }
}
